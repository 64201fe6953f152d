use std::{sync::Arc, time::Duration};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use futures::{future::BoxFuture, FutureExt};
use plugin_exchange::prelude::*;

struct Echo;

impl MessageHandler for Echo {
    fn handle<'a>(
        &'a self,
        _client: &'a PluginClient,
        message: PluginMessage,
    ) -> BoxFuture<'a, HandlerResult> {
        async move {
            if message.is_reply() {
                return Ok(None);
            }
            Ok(Some(message.reply(Params::new(), message.data.clone())))
        }
        .boxed()
    }
}

fn round_trip(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let _guard = rt.enter();

    let servers = ServerRegistry::new();
    servers.register("echo", Arc::new(Echo));
    let client =
        PluginClient::for_in_process(&servers, "echo", Arc::new(Echo), Dispatcher::new()).unwrap();

    let mut group = c.benchmark_group("send_and_wait");
    for size in [0usize, 1024, 64 * 1024] {
        group.bench_with_input(BenchmarkId::new("in_process", size), &size, |b, &size| {
            b.to_async(&rt).iter(|| async {
                let message = PluginMessage::new(Params::new(), Some(vec![0; size]));
                client
                    .send_and_wait(Direction::ToServer, message, Duration::from_secs(5))
                    .await
                    .unwrap()
            });
        });
    }
    group.finish();

    c.bench_function("send/in_process", |b| {
        b.iter(|| {
            client
                .send(Direction::ToServer, PluginMessage::new(Params::new(), None))
                .unwrap()
        });
    });
}

criterion_group!(benches, round_trip);
criterion_main!(benches);
