//! Dispatcher and evidence layer working together: parallel workstream
//! callbacks emitting into one chained log.

use std::sync::Arc;

use futures::FutureExt;
use sdp_core::evidence::event::VerificationData;
use sdp_core::evidence::{read_all, verify, Event, EventBody, Emitter};
use sdp_core::{config, Dispatcher, DispatcherConfig, WorkstreamCallback, WorkstreamGraph};

fn plan_graph() -> WorkstreamGraph {
    let mut graph = WorkstreamGraph::new();
    graph.add_node("00-001-01", &[]).unwrap();
    graph.add_node("00-001-02", &[]).unwrap();
    graph.add_node("00-001-03", &["00-001-01".to_string()]).unwrap();
    graph
        .add_node(
            "00-001-04",
            &["00-001-02".to_string(), "00-001-03".to_string()],
        )
        .unwrap();
    graph
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_callbacks_emit_into_a_valid_chain() {
    let dir = tempfile::tempdir().unwrap();
    config::init_project(dir.path()).unwrap();

    let emitter = Emitter::from_project(dir.path()).unwrap();
    assert!(emitter.is_enabled());

    let callback: WorkstreamCallback = {
        let emitter = emitter.clone();
        Arc::new(move |ws_id: String| {
            let emitter = emitter.clone();
            async move {
                emitter.emit_sync(Event::new(
                    ws_id,
                    EventBody::Verification(VerificationData {
                        passed: true,
                        gate_name: "acceptance".to_string(),
                        coverage: 1.0,
                        findings: None,
                    }),
                ))?;
                Ok(())
            }
            .boxed()
        })
    };

    let dispatcher = Dispatcher::new(
        plan_graph(),
        DispatcherConfig::new("F010")
            .with_concurrency(4)
            .with_checkpoint_dir(dir.path().join(".sdp/checkpoints")),
    )
    .unwrap();
    let report = dispatcher.execute(callback).await.unwrap();

    assert!(report.all_green());
    assert_eq!(report.completed.len(), 4);
    // Dependency order held even with parallel siblings.
    let pos = |id: &str| report.order.iter().position(|x| x == id).unwrap();
    assert!(pos("00-001-01") < pos("00-001-03"));
    assert!(pos("00-001-03") < pos("00-001-04"));

    // Every callback's evidence landed and the chain verifies.
    let log_path = dir.path().join(".sdp/log/events.jsonl");
    assert_eq!(read_all(&log_path).unwrap().len(), 4);
    assert_eq!(verify(&log_path).unwrap(), 4);

    // Clean run leaves no checkpoint behind.
    assert!(!dir.path().join(".sdp/checkpoints/F010-checkpoint.json").exists());
}
