//! Basic usage example for hostlink over SSH
//!
//! Resolves a URI into an execution system, runs a command, and prints
//! the captured output. Pass the target URI as the first argument:
//!
//! ```text
//! cargo run --example exec -- "ssh+exec://user@remote-host"
//! ```

use hostlink::{CommandContext, ExecutionProvider, OptionMap, ProcessState, ProviderRegistry};
use hostlink_ssh::SshExecutionProvider;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let uri = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ssh+exec://localhost".to_string());

    let registry = ProviderRegistry::new();
    let provider: Arc<dyn ExecutionProvider> = Arc::new(SshExecutionProvider::new());
    registry.register(provider).await?;

    println!("connecting to {uri}...");
    let system = registry.new_execution_system(&uri, &OptionMap::new()).await?;
    println!("connected");

    let command = system.clone().command("uname").arg("-a").build();
    let context = CommandContext::new().with_timeout(Duration::from_secs(30));
    let process = registry.execute(&command, &context).await?;

    match process.wait().await {
        ProcessState::Completed { exit_code } => {
            let output = process.output().expect("completed invocations carry output");
            println!("exit code: {exit_code}");
            print!("{}", output.stdout_string()?);
        }
        other => println!("invocation did not complete: {other:?}"),
    }

    system.close().await?;
    Ok(())
}
