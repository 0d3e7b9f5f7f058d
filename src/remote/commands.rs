//! Hand-off point for commands pushed back by the collector

use tracing::info;

use crate::remote::proto::Commands;

/// Receives command responses from `Collect` and `KeepAlive`
pub trait CommandSink: Send + Sync {
    fn receive(&self, commands: Commands);
}

/// Default sink: commands are only logged
#[derive(Debug, Default)]
pub struct LoggingCommandSink;

impl CommandSink for LoggingCommandSink {
    fn receive(&self, commands: Commands) {
        for command in commands.commands {
            let args: Vec<String> = command
                .args
                .iter()
                .map(|kv| format!("{}={}", kv.key, kv.value))
                .collect();
            info!("Received command {} [{}]", command.command, args.join(", "));
        }
    }
}
