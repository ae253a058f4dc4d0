use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Minimal operator console on stdin. `stop` triggers the same shutdown
/// path as a signal.
pub fn spawn(shutdown: watch::Sender<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match line.trim() {
                "" => {}
                "stop" => {
                    info!("stop requested from console");
                    let _ = shutdown.send(true);
                    break;
                }
                "help" => info!("console commands: stop, help"),
                other => info!(command = other, "unknown console command"),
            }
        }
    })
}
