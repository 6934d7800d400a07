use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Result;
use futures_util::StreamExt;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crate::ai::chat::Relay;
use crate::core::AppConfig;
use crate::openai::{Message, OpenAiGateway, Role, SharedGateway};

pub async fn run() -> Result<()> {
    let mut rl = DefaultEditor::new()?;

    let config = AppConfig::default();
    let gateway: SharedGateway = Arc::new(OpenAiGateway::from_config(&config));
    let relay = Relay::from_config(gateway, &config);

    let mut history: Vec<Message> = Vec::new();

    loop {
        let readline = rl.readline(">>> ");
        match readline {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line.as_str());
                history.push(Message::new(Role::User, line.as_str()));

                let mut stream = match relay.start(history.clone()).await {
                    Ok(stream) => stream,
                    Err(err) => {
                        println!("Error: {}", err);
                        // Drop the turn so it can be retried
                        history.pop();
                        continue;
                    }
                };

                let mut reply = String::new();
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(text) => {
                            print!("{}", text);
                            io::stdout().flush()?;
                            reply.push_str(&text);
                        }
                        Err(err) => {
                            println!("\nError: {}", err);
                            break;
                        }
                    }
                }
                println!();

                history.push(Message::new(Role::Assistant, &reply));
            }
            Err(ReadlineError::Interrupted) => break,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}
