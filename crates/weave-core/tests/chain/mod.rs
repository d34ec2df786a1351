//! 处理器链契约测试：声明顺序、LIFO 展开、单次回调与并发游标隔离。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use weave_core::chain::handler_registry;
use weave_core::{
    ChainRegistry, CoreError, Endpoint, Handler, Invocation, Next, Response, Role, StatusCode,
    codes,
};

/// 记录进入与退出顺序的处理器。
struct Tracer {
    name: &'static str,
    journal: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Handler for Tracer {
    fn name(&self) -> &str {
        self.name
    }

    async fn handle(&self, next: Next<'_>, inv: &mut Invocation) -> Response {
        self.journal.lock().push(format!("enter:{}", self.name));
        let response = next.run(inv).await;
        self.journal.lock().push(format!("exit:{}", self.name));
        response
    }
}

/// 不调用 `next` 的短路处理器。
struct Reject;

#[async_trait]
impl Handler for Reject {
    fn name(&self) -> &str {
        "reject"
    }

    async fn handle(&self, _next: Next<'_>, _inv: &mut Invocation) -> Response {
        Response::from_error(CoreError::admission(codes::RATE_LIMITED, "orders|0"))
    }
}

struct Business {
    calls: AtomicUsize,
}

#[async_trait]
impl Endpoint for Business {
    async fn serve(&self, inv: &mut Invocation) -> Response {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Response::ok(inv.operation_id.clone())
    }
}

fn registry_with(journal: &Arc<Mutex<Vec<String>>>) -> weave_core::HandlerRegistry {
    let handlers = handler_registry();
    for name in ["a", "b", "c"] {
        let journal = Arc::clone(journal);
        handlers.install(name, move || {
            Arc::new(Tracer {
                name,
                journal: Arc::clone(&journal),
            }) as Arc<dyn Handler>
        });
    }
    handlers.install("reject", || Arc::new(Reject) as Arc<dyn Handler>);
    handlers
}

#[tokio::test]
async fn forward_in_declared_order_and_unwind_lifo() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let handlers = registry_with(&journal);
    let chains = ChainRegistry::new();
    let chain = chains
        .build(Role::Consumer, "default", &["a", "b", "c"], &handlers)
        .expect("全部处理器已注册");

    let endpoint = Business {
        calls: AtomicUsize::new(0),
    };
    let mut inv = Invocation::new("orders", "GetOrder");
    let response = chain.execute_with(&mut inv, &endpoint).await;

    assert_eq!(response.payload.as_deref(), Some(&b"GetOrder"[..]));
    assert_eq!(
        *journal.lock(),
        vec!["enter:a", "enter:b", "enter:c", "exit:c", "exit:b", "exit:a"],
        "正向按声明顺序，响应侧按 LIFO 展开"
    );
}

#[tokio::test]
async fn short_circuit_skips_downstream_and_fires_callback_once() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let handlers = registry_with(&journal);
    let chains = ChainRegistry::new();
    let chain = chains
        .build(Role::Consumer, "guarded", &["a", "reject", "c"], &handlers)
        .expect("全部处理器已注册");

    let endpoint = Business {
        calls: AtomicUsize::new(0),
    };
    let fired = AtomicUsize::new(0);
    let mut seen = None;
    let mut inv = Invocation::new("orders", "GetOrder");
    chain
        .invoke(&mut inv, &endpoint, |response| {
            fired.fetch_add(1, Ordering::SeqCst);
            seen = Some(response.status);
        })
        .await;

    assert_eq!(fired.load(Ordering::SeqCst), 1, "回调恰好触发一次");
    assert_eq!(seen, Some(StatusCode::TOO_MANY_REQUESTS));
    assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0, "短路后终点不执行");
    assert_eq!(*journal.lock(), vec!["enter:a", "exit:a"]);
}

#[tokio::test]
async fn unknown_handler_fails_chain_construction() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let handlers = registry_with(&journal);
    let chains = ChainRegistry::new();

    let err = chains
        .build(Role::Provider, "default", &["a", "missing"], &handlers)
        .expect_err("未注册的处理器必须报错");
    assert_eq!(err.code(), codes::HANDLER_NOT_FOUND);

    let lookup = chains.get(Role::Provider, "default").err().map(|err| err.code());
    assert_eq!(lookup, Some(codes::CHAIN_NOT_FOUND), "构建失败不登记链");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_invocations_keep_independent_cursors() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let handlers = registry_with(&journal);
    let chains = ChainRegistry::new();
    let chain = chains
        .build(Role::Consumer, "default", &["a", "b", "c"], &handlers)
        .expect("全部处理器已注册");
    let endpoint = Arc::new(Business {
        calls: AtomicUsize::new(0),
    });

    let mut tasks = Vec::new();
    for index in 0..32 {
        let chain = Arc::clone(&chain);
        let endpoint = Arc::clone(&endpoint);
        tasks.push(tokio::spawn(async move {
            let mut inv = Invocation::new("orders", format!("op-{index}"));
            chain.execute_with(&mut inv, endpoint.as_ref()).await
        }));
    }
    for task in tasks {
        let response = task.await.expect("任务不应 panic");
        assert!(!response.is_failure());
    }

    assert_eq!(endpoint.calls.load(Ordering::SeqCst), 32, "每次调用都完整走到终点");
    assert_eq!(journal.lock().len(), 32 * 6);
}
