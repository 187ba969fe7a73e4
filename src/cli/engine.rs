use crate::cli::EngineArgs;
use planbridge::config::Config;
use planbridge::gateway::{CommandArgs, EngineCommand, Gateway};
use tracing::info;

pub async fn execute(config: &Config, args: EngineArgs) -> anyhow::Result<()> {
    let tokens: Vec<String> = args
        .tokens
        .into_iter()
        .skip_while(|t| t == "--")
        .collect();

    let (command, consumed) = EngineCommand::parse(&tokens)?;
    let engine_args = CommandArgs::parse(command, &tokens[consumed..])?;

    let gateway = Gateway::new(config);
    info!("Invoking '{}' via {}", command, gateway.transport_name());
    let stdout = gateway.invoke(command, &engine_args).await?;

    if command.writes_output_file() {
        if let Some(path) = engine_args.get("output") {
            eprintln!("Output written to {}", path);
        }
    }
    print!("{}", stdout);
    Ok(())
}
