pub mod command;
pub mod controller;
pub mod mode;

use std::io;
use std::time::Instant;

pub use controller::{SessionController, SessionOptions, SessionView};
pub use mode::Mode;

use crate::terminal::{InputSource, Renderer};

/// Drives `controller` until it exits, then waits for pending open actions.
/// The wait also happens when input or drawing fails.
pub async fn run<I, R>(
    controller: &mut SessionController,
    input: &mut I,
    renderer: &mut R,
) -> io::Result<()>
where
    I: InputSource,
    R: Renderer,
{
    let outcome = drive(controller, input, renderer).await;
    controller.finish().await;
    outcome
}

async fn drive<I, R>(
    controller: &mut SessionController,
    input: &mut I,
    renderer: &mut R,
) -> io::Result<()>
where
    I: InputSource,
    R: Renderer,
{
    loop {
        let key = input.poll_key()?;
        controller.tick(Instant::now(), key);
        if controller.mode() == Mode::Exit {
            return Ok(());
        }
        renderer.draw(&controller.view())?;
        tokio::time::sleep(controller.tick_interval()).await;
    }
}
