//! Built-in example tasks served by `courier run`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use courier_core::{
    Courier, FnHandler, HandlerError, RegisterOptions, Request, TaskArgs, Typed, TypedHandler,
};
use courier_core::domain::RegistryError;

#[derive(Debug, Deserialize)]
pub struct GreetArgs {
    pub name: String,
}

impl TaskArgs for GreetArgs {
    const PARAMS: Option<&'static [&'static str]> = Some(&["name"]);
}

#[derive(Debug, Serialize)]
pub struct Greeting {
    pub message: String,
}

pub struct Greet;

#[async_trait]
impl TypedHandler<GreetArgs> for Greet {
    type Output = Greeting;

    async fn handle(&self, args: GreetArgs, _req: &Request) -> Result<Greeting, HandlerError> {
        Ok(Greeting {
            message: format!("Hello, {}.", args.name),
        })
    }
}

/// Patterns registered by `register_all`, in order.
pub const PATTERNS: [&str; 4] = [
    "example:greet",
    "example:fail",
    "*",
    "example:greet:on_completed",
];

pub fn register_all(courier: &mut Courier) -> Result<(), RegistryError> {
    let greet = courier.register(
        Typed::<GreetArgs, _>::new("example", "greet", Greet),
        RegisterOptions::new(),
    )?;

    let fail = FnHandler::new("example", "fail", |_req: Request| async {
        Err::<Value, _>(HandlerError::permanent("example:fail always fails"))
    });
    courier.register(fail, RegisterOptions::new())?;

    let audit = FnHandler::new("example", "audit", |req: Request| async move {
        info!(channel = req.channel(), kind = req.kind(), "audit");
        Ok(Value::Null)
    });
    courier.register(audit, RegisterOptions::new().pattern("*").ignore_result(true))?;

    let announce = FnHandler::new("example", "announce", |req: Request| async move {
        if let Some(message) = req.payload().get("message").and_then(Value::as_str) {
            info!(greeting = message, "greeted");
        }
        Ok(Value::Null)
    });
    courier.on_completed(&greet, announce, RegisterOptions::new().ignore_result(true))?;

    Ok(())
}
