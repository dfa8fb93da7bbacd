//! `vigil run`: the sampling loop and the keyboard listener on their own
//! threads, with the signal listener on the async runtime.

use crate::config::Config;
use anyhow::{bail, Context, Result};
use std::io::BufRead;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::oneshot;
use vigil_core::{Exit, KillSwitch, ReferenceSet, SamplingLoop, UserInterrupt};
use vigil_hw::{Camera, CommandActions};
use vigil_vision::FaceAnalyzer;

pub async fn run(config: Config) -> Result<()> {
    let reference = Arc::new(
        ReferenceSet::load(&config.reference_path)
            .with_context(|| format!("loading {}", config.reference_path.display()))?,
    );
    let camera = Camera::open(&config.camera_device)?;
    let analyzer = FaceAnalyzer::load(&config.model_dir)?;
    let actions = CommandActions::new(config.actions.clone());
    let settings = config.loop_settings();

    let kill_switch = KillSwitch::new();
    let interrupt = UserInterrupt::new();

    let (done_tx, done_rx) = oneshot::channel();
    {
        let kill_switch = kill_switch.clone();
        let interrupt = interrupt.clone();
        std::thread::Builder::new()
            .name("vigil-sampler".into())
            .spawn(move || {
                let mut sampler = SamplingLoop::new(
                    camera,
                    analyzer,
                    actions,
                    reference,
                    settings,
                    kill_switch,
                    interrupt,
                    Instant::now(),
                );
                let _ = done_tx.send(sampler.run());
            })
            .context("failed to spawn sampler thread")?;
    }

    // Blocking stdin reads stay off the runtime so it can shut down.
    spawn_interrupt_listener(std::io::BufReader::new(std::io::stdin()), interrupt)
        .context("failed to spawn stdin listener")?;

    tokio::select! {
        sig = kill_signal() => {
            let sig = sig.context("installing signal handlers")?;
            kill_switch.trip();
            tracing::warn!(signal = sig, "kill switch: terminating immediately");
            std::process::exit(0);
        }
        outcome = done_rx => {
            match outcome {
                Ok(Ok(Exit::LockedDown)) => {
                    tracing::info!("lockdown complete, exiting");
                    Ok(())
                }
                Ok(Ok(Exit::KillSwitch)) => Ok(()),
                Ok(Err(e)) => Err(e).context("sampling loop failed"),
                Err(_) => bail!("sampler thread exited without a result"),
            }
        }
    }
}

/// Resolve on the first SIGINT or SIGTERM.
async fn kill_signal() -> std::io::Result<&'static str> {
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            Ok("SIGINT")
        }
        _ = term.recv() => Ok("SIGTERM"),
    }
}

/// Every line read from `input` (Enter on stdin) counts as a user interrupt.
fn spawn_interrupt_listener<R>(input: R, interrupt: UserInterrupt) -> std::io::Result<JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    std::thread::Builder::new()
        .name("vigil-stdin".into())
        .spawn(move || {
            for line in input.lines() {
                match line {
                    Ok(_) => {
                        tracing::debug!("user interrupt");
                        interrupt.raise();
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed, user interrupts disabled");
                        return;
                    }
                }
            }
            tracing::debug!("stdin closed, user interrupts disabled");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Read};
    use std::sync::mpsc;
    use std::time::Duration;

    /// Input that blocks until bytes arrive and ends when the sender drops.
    struct OpenPipe(mpsc::Receiver<u8>);

    impl Read for OpenPipe {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if buf.is_empty() {
                return Ok(0);
            }
            match self.0.recv() {
                Ok(b) => {
                    buf[0] = b;
                    Ok(1)
                }
                Err(_) => Ok(0),
            }
        }
    }

    #[test]
    fn test_each_line_raises_interrupt() {
        let (tx, rx) = mpsc::channel();
        let interrupt = UserInterrupt::new();
        let handle = spawn_interrupt_listener(BufReader::new(OpenPipe(rx)), interrupt.clone()).unwrap();

        tx.send(b'\n').unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !interrupt.take() {
            assert!(Instant::now() < deadline, "interrupt was never raised");
            std::thread::sleep(Duration::from_millis(5));
        }

        drop(tx);
        handle.join().unwrap();
        assert!(!interrupt.take());
    }

    #[test]
    fn test_runtime_shuts_down_while_input_is_open() {
        let (tx, rx) = mpsc::channel::<u8>();
        let started = Instant::now();
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            spawn_interrupt_listener(BufReader::new(OpenPipe(rx)), UserInterrupt::new()).unwrap();
        });
        drop(rt);
        assert!(started.elapsed() < Duration::from_secs(2));
        drop(tx);
    }
}
