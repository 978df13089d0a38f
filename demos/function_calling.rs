//! Function calling example.
//!
//! Run with: QIANFAN_AK=... QIANFAN_SK=... cargo run --example function_calling

use qianfan_sdk::{ChatBody, Client, Function, Message};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let client = Client::from_env()?;

    // Define available functions
    let functions = vec![Function::new(
        "get_weather",
        "Get the current weather for a location",
        json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "City name, e.g. 'Beijing'"
                },
                "unit": {
                    "type": "string",
                    "enum": ["celsius", "fahrenheit"]
                }
            },
            "required": ["location"]
        }),
    )];

    let body = ChatBody::new(vec![Message::user("What's the weather like in Shanghai?")])
        .functions(functions);

    println!("Requesting with function calling...\n");

    let resp = client.chat_complete(&body, "ERNIE-Bot").await?;

    match &resp.function_call {
        Some(call) => {
            println!("--- Function Call ---");
            println!("Function: {}", call.name);
            println!("Arguments: {}", call.arguments);
            if let Some(thoughts) = &call.thoughts {
                println!("Thoughts: {thoughts}");
            }

            // Answer with a canned result and let the model finish.
            let mut messages = body.messages.clone();
            messages.push(Message {
                function_call: Some(call.clone()),
                ..Message::assistant("")
            });
            messages.push(Message::function_result(
                call.name.clone(),
                json!({"temperature": 22, "unit": "celsius"}).to_string(),
            ));

            let follow_up = client
                .chat_complete(&ChatBody::new(messages), "ERNIE-Bot")
                .await?;
            println!("\n{}", follow_up.text());
        }
        None => println!("{}", resp.text()),
    }

    Ok(())
}
