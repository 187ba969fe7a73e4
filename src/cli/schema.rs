use crate::cli::SchemaArgs;
use planbridge::config::Config;
use planbridge::gateway::EngineCommand;
use schemars::schema_for;
use serde_json::{json, Value};

pub fn execute(args: SchemaArgs) -> anyhow::Result<()> {
    let doc = if args.engine {
        engine_commands()
    } else {
        serde_json::to_value(schema_for!(Config))?
    };
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

/// Argument table for every engine command the gateway accepts
fn engine_commands() -> Value {
    let commands: Vec<Value> = EngineCommand::ALL
        .iter()
        .map(|command| {
            let args: Vec<Value> = command
                .schema()
                .iter()
                .map(|spec| {
                    json!({
                        "flag": format!("--{}", spec.flag),
                        "required": spec.required,
                        "expects": spec.kind.expected(),
                    })
                })
                .collect();
            json!({
                "command": command.to_string(),
                "long_running": command.is_long_running(),
                "writes_output_file": command.writes_output_file(),
                "args": args,
            })
        })
        .collect();
    json!({ "commands": commands })
}
