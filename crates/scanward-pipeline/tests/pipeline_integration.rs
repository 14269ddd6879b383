use std::sync::Arc;
use std::time::Duration;

use compliance_rag::fakes::StaticIndex;
use scanward_core::domain::{
    DepthLevel, PipelineRequest, PlanSequence, ScanCategory, ScanStatus, StageId, StateKey,
    ToolExecutionError,
};
use scanward_core::fakes::ResponderCompletion;
use scanward_core::jobs::{JobQueue, JobStatus, LocalJobQueue};
use scanward_core::provider::CompletionClient;
use scanward_core::{CancellationToken, ScanwardConfig};
use scanward_pipeline::fakes::ScriptedScanTool;
use scanward_pipeline::{PipelineJobRunner, PipelineRun, RunStatus, ScanTool, SecurityPipeline};
use serde_json::json;

const REPO: &str = "https://example.com/repo.git";

fn model() -> Arc<dyn CompletionClient> {
    Arc::new(ResponderCompletion::new(|prompt: &str| {
        if prompt.contains("vulnerability-report planner") {
            Ok("```json\n{\"depth\": \"full\"}\n```".to_string())
        } else if prompt.contains("compliance expert") {
            Ok(r#"[{"regulation":"OWASP ASVS V5.2.4","reason":"dynamic code execution"}]"#.to_string())
        } else {
            Ok("Avoid eval on untrusted input.".to_string())
        }
    }))
}

fn code_tool() -> Arc<ScriptedScanTool> {
    Arc::new(ScriptedScanTool::new(ScanCategory::Code).with_results(
        REPO,
        vec![json!({
            "check_id": "python.lang.security.audit.eval-detected",
            "extra": {"message": "Detected use of eval()"}
        })],
    ))
}

fn pipeline(dir: &std::path::Path, tools: Vec<Arc<dyn ScanTool>>) -> SecurityPipeline {
    let config = ScanwardConfig {
        output_dir: dir.to_path_buf(),
        ..ScanwardConfig::default()
    };
    let index = Arc::new(StaticIndex::from_triples(&[
        ("asvs.pdf", 12, "V5.2.4 Verify that the application avoids eval()"),
        ("asvs.pdf", 11, "V5.2 Sanitization and Sandboxing"),
    ]));
    SecurityPipeline::assemble(&config, model(), index, tools)
}

#[tokio::test]
async fn code_only_request_marks_web_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path(), vec![code_tool()]);
    let request = PipelineRequest::new(vec![REPO.to_string()], [ScanCategory::Code], "").unwrap();

    let run = pipeline
        .run_with_plan(&request, &PlanSequence::for_depth(DepthLevel::Minimal), &CancellationToken::new())
        .await;

    assert!(run.is_completed());
    let scan = run.state.scan_results().unwrap();
    let code = scan.get(ScanCategory::Code).unwrap().outcome().unwrap();
    assert_eq!(code.status, ScanStatus::Success);
    assert_eq!(code.artifact.results.len(), 1);
    assert!(scan.get(ScanCategory::Web).unwrap().is_empty_marker());
}

#[tokio::test]
async fn full_run_annotates_items_and_writes_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path(), vec![code_tool()]);
    let request =
        PipelineRequest::new(vec![REPO.to_string()], [ScanCategory::Code], "full audit").unwrap();

    let run = pipeline.run(&request, &CancellationToken::new()).await;

    assert!(run.is_completed(), "{:?}", run.status);
    assert_eq!(run.executed, StageId::ALL.to_vec());

    let explained = run.state.explanations().unwrap();
    assert_eq!(explained.failed, 0);
    assert_eq!(
        explained.items[0].explanation(),
        Some("Avoid eval on untrusted input.")
    );

    let compliance = run.state.compliance().unwrap();
    let item = &compliance.items[0];
    assert_eq!(item.violations()[0].regulation, "OWASP ASVS V5.2.4");
    // Explanation from the previous stage is carried forward.
    assert!(item.explanation().is_some());
    assert_eq!(item.item["compliance_sources"][0]["chunk_ids"], json!([11, 12]));
    assert_eq!(item.item["compliance_degraded"], json!(false));

    let report = run.state.report().unwrap();
    let md = std::fs::read_to_string(report.location.as_ref().unwrap()).unwrap();
    assert!(md.contains("python.lang.security.audit.eval-detected"));

    let narration = run.state.narration().unwrap();
    assert!(narration.script.contains("found one issue"));
    assert!(narration.location.is_some());
}

#[tokio::test]
async fn compliance_requires_successful_scan() {
    let dir = tempfile::tempdir().unwrap();
    let failing: Arc<dyn ScanTool> = Arc::new(ScriptedScanTool::new(ScanCategory::Code).with_error(
        REPO,
        ToolExecutionError::Failed {
            tool: "code".into(),
            message: "clone refused".into(),
        },
    ));
    let pipeline = pipeline(dir.path(), vec![failing]);
    let request = PipelineRequest::new(vec![REPO.to_string()], [ScanCategory::Code], "").unwrap();

    let run = pipeline
        .run_with_plan(&request, &PlanSequence::for_depth(DepthLevel::Cve), &CancellationToken::new())
        .await;

    match &run.status {
        RunStatus::Aborted { kind, stage, .. } => {
            assert_eq!(kind, "stage");
            assert_eq!(*stage, Some(StageId::Compliance));
        }
        other => panic!("expected abort, got {other:?}"),
    }
    assert_eq!(run.state.keys(), vec![StateKey::ScanResults]);
}

#[tokio::test]
async fn plan_without_scan_aborts_on_missing_dependency() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(dir.path(), vec![code_tool()]);
    let request = PipelineRequest::new(vec![REPO.to_string()], [ScanCategory::Code], "").unwrap();
    let plan = PlanSequence::new(vec![StageId::Report]).unwrap();

    let run = pipeline
        .run_with_plan(&request, &plan, &CancellationToken::new())
        .await;

    assert!(matches!(
        run.status,
        RunStatus::Aborted { ref kind, stage: Some(StageId::Report), .. } if kind == "configuration"
    ));
    assert!(run.executed.is_empty());
}

#[tokio::test]
async fn submitted_run_can_be_polled_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Arc::new(pipeline(dir.path(), vec![code_tool()]));
    let queue: LocalJobQueue<PipelineRequest, PipelineRun> = LocalJobQueue::new(Arc::new(PipelineJobRunner::new(pipeline)), 1);
    let request = PipelineRequest::new(vec![REPO.to_string()], [ScanCategory::Code], "").unwrap();

    let id = queue.submit(request).await.unwrap();
    let mut snapshot = queue.poll(&id).await.unwrap();
    for _ in 0..200 {
        if snapshot.status == JobStatus::Completed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        snapshot = queue.poll(&id).await.unwrap();
    }

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert!(snapshot.result.unwrap().is_completed());
}
