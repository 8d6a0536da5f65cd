mod actions;
mod cli;
mod config;
mod geometry;
mod gestures;
mod input;
mod ipc;
mod landmarks;
mod logging;
mod scroll;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
