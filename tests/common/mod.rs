#![allow(dead_code)]

use std::sync::Arc;

use futures::future::BoxFuture;
use plugin_exchange::prelude::*;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct FnHandler<F> {
    name: &'static str,
    priority: Option<Priority>,
    f: F,
}

impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&PluginClient, PluginMessage) -> BoxFuture<'static, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    fn handle<'a>(
        &'a self,
        client: &'a PluginClient,
        message: PluginMessage,
    ) -> BoxFuture<'a, HandlerResult> {
        (self.f)(client, message)
    }

    fn priority(&self) -> Option<Priority> {
        self.priority
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// Builds a handler from a closure.
pub fn handler<F>(name: &'static str, f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(&PluginClient, PluginMessage) -> BoxFuture<'static, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnHandler {
        name,
        priority: None,
        f,
    })
}

pub fn request(identifier: &str, op: &str) -> PluginMessage {
    let mut params = Params::new();
    params.insert("op".to_string(), op.to_string());
    PluginMessage::with_identifier(identifier, params, None)
}
