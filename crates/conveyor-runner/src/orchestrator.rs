//! Pipeline runner - executes stages in declared order.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use conveyor_core::action::{Action, ActionSpec};
use conveyor_core::artifact::ArtifactRef;
use conveyor_core::build::BuildRunner;
use conveyor_core::deploy::Deployer;
use conveyor_core::pipeline::{Pipeline, Stage};
use conveyor_core::source::SourceProvider;
use conveyor_core::{Error, Result, RunId};
use futures::future;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::vars::VariableTable;

/// Event emitted during a run.
#[derive(Debug, Clone)]
pub enum RunEvent {
    StageStarted { stage: String },
    ActionCompleted { stage: String, action: String, success: bool },
    StageCompleted { stage: String, success: bool },
    RunCompleted { success: bool },
}

/// Outcome of a single stage.
#[derive(Debug, Clone)]
pub enum StageOutcome {
    Succeeded,
    /// One or more actions failed; siblings that succeeded first keep
    /// their recorded outputs for diagnostics.
    Failed { failures: Vec<ActionFailure> },
    /// Never dispatched: an earlier stage failed or the run was cancelled.
    NotDispatched,
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Succeeded)
    }
}

/// A failed action and the error it reported.
#[derive(Debug, Clone)]
pub struct ActionFailure {
    pub action: String,
    pub error: String,
}

/// Per-stage record in the final report.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub name: String,
    pub outcome: StageOutcome,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Final status of a run.
#[derive(Debug, Clone)]
pub enum RunStatus {
    Succeeded,
    /// First failed stage and the actions that failed in it.
    Failed { stage: String, actions: Vec<String> },
    /// Cancelled between stages; `after_stage` is the last completed one.
    Cancelled { after_stage: Option<String> },
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Succeeded)
    }
}

/// Final result of a pipeline run.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: RunId,
    pub status: RunStatus,
    pub stages: Vec<StageReport>,
    /// Every artifact produced during the run, by name.
    pub artifacts: HashMap<String, ArtifactRef>,
}

/// Handle to an in-flight pipeline run.
pub struct RunHandle {
    /// Events emitted as actions and stages complete.
    pub events: mpsc::Receiver<RunEvent>,
    /// Resolves to the final report.
    pub join: JoinHandle<RunReport>,
    cancel: watch::Sender<bool>,
}

impl RunHandle {
    /// Stop dispatch of stages that have not started yet. Actions already
    /// dispatched in the current stage run to completion; their external
    /// effects are not aborted.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }
}

/// Output captured from a successful action.
#[derive(Debug, Default)]
struct ActionOutput {
    artifacts: Vec<ArtifactRef>,
    exports: HashMap<String, String>,
}

/// Executes pipelines against source, build, and deploy backends.
///
/// Control flow is stage-sequential and action-parallel: all actions of a
/// stage are dispatched concurrently, and stage *n+1* starts only after
/// every action of stage *n* succeeded. The first failed stage halts the
/// run; nothing is retried and completed external effects are not rolled
/// back.
pub struct PipelineRunner {
    sources: Arc<dyn SourceProvider>,
    builds: Arc<dyn BuildRunner>,
    deploys: Arc<dyn Deployer>,
}

impl PipelineRunner {
    pub fn new(
        sources: Arc<dyn SourceProvider>,
        builds: Arc<dyn BuildRunner>,
        deploys: Arc<dyn Deployer>,
    ) -> Self {
        Self {
            sources,
            builds,
            deploys,
        }
    }

    /// Start a run on a background task, returning a handle carrying the
    /// event stream, the cancel switch, and the final report.
    pub fn run(&self, pipeline: &Pipeline) -> RunHandle {
        let (tx, rx) = mpsc::channel(100);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let sources = self.sources.clone();
        let builds = self.builds.clone();
        let deploys = self.deploys.clone();
        let pipeline = pipeline.clone();

        let join = tokio::spawn(async move {
            run_inner(sources, builds, deploys, pipeline, cancel_rx, tx).await
        });

        RunHandle {
            events: rx,
            join,
            cancel: cancel_tx,
        }
    }
}

async fn run_inner(
    sources: Arc<dyn SourceProvider>,
    builds: Arc<dyn BuildRunner>,
    deploys: Arc<dyn Deployer>,
    pipeline: Pipeline,
    cancel: watch::Receiver<bool>,
    tx: mpsc::Sender<RunEvent>,
) -> RunReport {
    let run_id = RunId::new();
    let mut vars = VariableTable::new();
    let mut artifacts: HashMap<String, ArtifactRef> = HashMap::new();
    let mut reports: Vec<StageReport> = pipeline
        .stages()
        .iter()
        .map(|stage| StageReport {
            name: stage.name.clone(),
            outcome: StageOutcome::NotDispatched,
            started_at: None,
            finished_at: None,
        })
        .collect();
    let mut status = RunStatus::Succeeded;
    let mut last_completed: Option<String> = None;

    info!(run = %run_id, pipeline = %pipeline.name(), "Starting pipeline run");

    for (idx, stage) in pipeline.stages().iter().enumerate() {
        if *cancel.borrow() {
            info!(run = %run_id, stage = %stage.name, "Run cancelled before stage dispatch");
            status = RunStatus::Cancelled {
                after_stage: last_completed.clone(),
            };
            break;
        }

        let _ = tx
            .send(RunEvent::StageStarted {
                stage: stage.name.clone(),
            })
            .await;
        reports[idx].started_at = Some(Utc::now());

        let results = run_stage(&sources, &builds, &deploys, stage, &vars, &artifacts, &tx).await;
        reports[idx].finished_at = Some(Utc::now());

        // Record outputs of every succeeded action before judging the
        // stage, so a failed stage still leaves diagnostics behind.
        let mut failures = Vec::new();
        for (action, result) in results {
            match result {
                Ok(output) => {
                    for artifact in output.artifacts {
                        artifacts.insert(artifact.name.clone(), artifact);
                    }
                    if !output.exports.is_empty() {
                        vars.record(&action, &output.exports);
                    }
                }
                Err(e) => {
                    error!(run = %run_id, stage = %stage.name, action = %action, error = %e, "Action failed");
                    failures.push(ActionFailure {
                        action,
                        error: e.to_string(),
                    });
                }
            }
        }

        let success = failures.is_empty();
        let _ = tx
            .send(RunEvent::StageCompleted {
                stage: stage.name.clone(),
                success,
            })
            .await;

        if success {
            info!(run = %run_id, stage = %stage.name, "Stage completed successfully");
            reports[idx].outcome = StageOutcome::Succeeded;
            last_completed = Some(stage.name.clone());
        } else {
            let actions = failures.iter().map(|f| f.action.clone()).collect();
            reports[idx].outcome = StageOutcome::Failed { failures };
            status = RunStatus::Failed {
                stage: stage.name.clone(),
                actions,
            };
            break;
        }
    }

    let success = status.is_success();
    let _ = tx.send(RunEvent::RunCompleted { success }).await;

    RunReport {
        run_id,
        status,
        stages: reports,
        artifacts,
    }
}

/// Dispatch every action of a stage concurrently and collect the results.
async fn run_stage(
    sources: &Arc<dyn SourceProvider>,
    builds: &Arc<dyn BuildRunner>,
    deploys: &Arc<dyn Deployer>,
    stage: &Stage,
    vars: &VariableTable,
    artifacts: &HashMap<String, ArtifactRef>,
    tx: &mpsc::Sender<RunEvent>,
) -> Vec<(String, Result<ActionOutput>)> {
    let tasks = stage.actions.iter().map(|action| {
        let tx = tx.clone();
        async move {
            let result = run_action(sources, builds, deploys, action, vars, artifacts).await;
            let _ = tx
                .send(RunEvent::ActionCompleted {
                    stage: stage.name.clone(),
                    action: action.name.clone(),
                    success: result.is_ok(),
                })
                .await;
            (action.name.clone(), result)
        }
    });

    future::join_all(tasks).await
}

async fn run_action(
    sources: &Arc<dyn SourceProvider>,
    builds: &Arc<dyn BuildRunner>,
    deploys: &Arc<dyn Deployer>,
    action: &Action,
    vars: &VariableTable,
    artifacts: &HashMap<String, ArtifactRef>,
) -> Result<ActionOutput> {
    match &action.spec {
        ActionSpec::Source { repository, output } => {
            let artifact = sources.fetch(&action.name, repository, output).await?;
            info!(action = %action.name, artifact = %artifact.name, "Source fetched");
            Ok(ActionOutput {
                artifacts: vec![artifact],
                exports: HashMap::new(),
            })
        }
        ActionSpec::Build {
            build,
            inputs,
            outputs,
            exports,
        } => {
            let inputs = gather_inputs(&action.name, inputs, artifacts)?;
            let result = builds.run(&action.name, build, &inputs).await?;

            // All declared output artifacts must materialize; a partial
            // result is a failed build.
            for name in outputs {
                if !result.artifacts.iter().any(|a| &a.name == name) {
                    return Err(Error::BuildFailed {
                        action: action.name.clone(),
                        reason: format!("declared output artifact '{name}' was not produced"),
                    });
                }
            }
            // A missing export is only fatal once a deploy action asks for
            // the value, but it is worth flagging at the source.
            for name in exports {
                if !result.exports.contains_key(name) {
                    warn!(action = %action.name, export = %name, "Declared export was not produced");
                }
            }

            Ok(ActionOutput {
                artifacts: result.artifacts,
                exports: result.exports,
            })
        }
        ActionSpec::Deploy {
            target,
            inputs,
            parameters,
        } => {
            // Substitution happens here, immediately before the external
            // call; a missing value fails the action without the deployer
            // ever being invoked.
            let resolved = vars.resolve(&action.name, parameters)?;
            let inputs = gather_inputs(&action.name, inputs, artifacts)?;
            let handle = deploys
                .deploy(&action.name, target, &inputs, &resolved)
                .await?;
            info!(action = %action.name, target = %handle.target, "Deployed");
            Ok(ActionOutput::default())
        }
    }
}

/// Collect the input artifact handles an action consumes.
///
/// The construction-time checker guarantees every input has a producer in
/// an earlier stage, and a stage only completes successfully when all its
/// declared outputs exist, so a miss here is an orchestrator bug.
fn gather_inputs(
    action: &str,
    names: &[String],
    artifacts: &HashMap<String, ArtifactRef>,
) -> Result<Vec<ArtifactRef>> {
    names
        .iter()
        .map(|name| {
            artifacts.get(name).cloned().ok_or_else(|| {
                Error::Internal(format!(
                    "input artifact '{name}' for action '{action}' was never recorded"
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conveyor_core::action::{ParamValue, VariableRef};
    use conveyor_core::build::{BuildOutput, BuildSpec};
    use conveyor_core::deploy::{DeployTarget, DeploymentHandle};
    use conveyor_core::repository::RepositoryRef;
    use conveyor_core::secret::SecretHandle;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeSource {
        fail: HashSet<String>,
        log: Option<Arc<Mutex<Vec<String>>>>,
    }

    #[async_trait]
    impl SourceProvider for FakeSource {
        async fn fetch(
            &self,
            action: &str,
            repository: &RepositoryRef,
            output: &str,
        ) -> Result<ArtifactRef> {
            if let Some(log) = &self.log {
                log.lock().unwrap().push(format!("end:{action}"));
            }
            if self.fail.contains(action) {
                return Err(Error::SourceUnavailable {
                    action: action.to_string(),
                    reason: format!("branch '{}' not found", repository.branch),
                });
            }
            Ok(ArtifactRef {
                name: output.to_string(),
                location: format!("git://{}@deadbeef", repository.full_name()),
                checksum: Some("deadbeef".to_string()),
                size: None,
            })
        }
    }

    /// Build backend returning canned outputs per action name.
    #[derive(Default)]
    struct FakeBuilder {
        outputs: HashMap<String, BuildOutput>,
        fail: HashSet<String>,
        delay: Option<Duration>,
        log: Option<Arc<Mutex<Vec<String>>>>,
    }

    #[async_trait]
    impl BuildRunner for FakeBuilder {
        async fn run(
            &self,
            action: &str,
            _spec: &BuildSpec,
            _inputs: &[ArtifactRef],
        ) -> Result<BuildOutput> {
            if let Some(log) = &self.log {
                log.lock().unwrap().push(format!("start:{action}"));
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(log) = &self.log {
                log.lock().unwrap().push(format!("end:{action}"));
            }
            if self.fail.contains(action) {
                return Err(Error::BuildFailed {
                    action: action.to_string(),
                    reason: "exit code 1".to_string(),
                });
            }
            Ok(self.outputs.get(action).cloned().unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct FakeDeployer {
        calls: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    }

    #[async_trait]
    impl Deployer for FakeDeployer {
        async fn deploy(
            &self,
            action: &str,
            target: &DeployTarget,
            _inputs: &[ArtifactRef],
            parameters: &BTreeMap<String, String>,
        ) -> Result<DeploymentHandle> {
            self.calls
                .lock()
                .unwrap()
                .push((action.to_string(), parameters.clone()));
            Ok(DeploymentHandle {
                action: action.to_string(),
                target: target.target.clone(),
                location: format!("deployment/{}", target.target),
            })
        }
    }

    fn source_action(name: &str, output: &str) -> Action {
        Action::new(
            name,
            ActionSpec::Source {
                repository: RepositoryRef::new("acme", "app", "main", SecretHandle::new("token")),
                output: output.to_string(),
            },
        )
    }

    fn build_action(name: &str, inputs: &[&str], outputs: &[&str], exports: &[&str]) -> Action {
        Action::new(
            name,
            ActionSpec::Build {
                build: BuildSpec::default(),
                inputs: inputs.iter().map(|s| s.to_string()).collect(),
                outputs: outputs.iter().map(|s| s.to_string()).collect(),
                exports: exports.iter().map(|s| s.to_string()).collect(),
            },
        )
    }

    fn deploy_action(name: &str, inputs: &[&str]) -> Action {
        Action::new(
            name,
            ActionSpec::Deploy {
                target: DeployTarget::new("app.template.json", "app"),
                inputs: inputs.iter().map(|s| s.to_string()).collect(),
                parameters: BTreeMap::from([
                    (
                        "Tag".to_string(),
                        ParamValue::Variable(VariableRef::new("CodeBuild", "imageTag")),
                    ),
                    ("Replicas".to_string(), ParamValue::Literal("2".to_string())),
                ]),
            },
        )
    }

    fn backend_pipeline() -> Pipeline {
        Pipeline::new(
            "backend-deployment",
            vec![
                Stage::new("Source", vec![source_action("GitHub_Source", "code")]),
                Stage::new(
                    "Build",
                    vec![build_action("CodeBuild", &["code"], &["image"], &["imageTag"])],
                ),
                Stage::new("Deploy", vec![deploy_action("Deploy", &["image"])]),
            ],
        )
        .unwrap()
    }

    fn builder_with(action: &str, artifacts: &[&str], exports: &[(&str, &str)]) -> FakeBuilder {
        FakeBuilder {
            outputs: HashMap::from([(
                action.to_string(),
                BuildOutput {
                    artifacts: artifacts
                        .iter()
                        .map(|name| ArtifactRef::new(*name, format!("store://{name}")))
                        .collect(),
                    exports: exports
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                },
            )]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn exported_tag_reaches_deploy_parameters() {
        let deployer = Arc::new(FakeDeployer::default());
        let runner = PipelineRunner::new(
            Arc::new(FakeSource::default()),
            Arc::new(builder_with("CodeBuild", &["image"], &[("imageTag", "abc123")])),
            deployer.clone(),
        );

        let mut handle = runner.run(&backend_pipeline());
        let report = (&mut handle.join).await.unwrap();
        assert!(report.status.is_success());

        let calls = deployer.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (action, params) = &calls[0];
        assert_eq!(action, "Deploy");
        assert_eq!(params.get("Tag").map(String::as_str), Some("abc123"));
        assert_eq!(params.get("Replicas").map(String::as_str), Some("2"));

        // Event stream ends with a successful completion.
        let mut events = Vec::new();
        while let Some(event) = handle.events.recv().await {
            events.push(event);
        }
        assert!(matches!(
            events.last(),
            Some(RunEvent::RunCompleted { success: true })
        ));
    }

    #[tokio::test]
    async fn missing_export_fails_deploy_before_dispatch() {
        // Build declares `imageTag` but produces only the artifact.
        let deployer = Arc::new(FakeDeployer::default());
        let runner = PipelineRunner::new(
            Arc::new(FakeSource::default()),
            Arc::new(builder_with("CodeBuild", &["image"], &[])),
            deployer.clone(),
        );

        let report = runner.run(&backend_pipeline()).join.await.unwrap();

        let RunStatus::Failed { stage, actions } = &report.status else {
            panic!("expected failure, got {:?}", report.status);
        };
        assert_eq!(stage, "Deploy");
        assert_eq!(actions, &vec!["Deploy".to_string()]);

        // The deployer itself was never invoked.
        assert!(deployer.calls.lock().unwrap().is_empty());

        let StageOutcome::Failed { failures } = &report.stages[2].outcome else {
            panic!("expected failed deploy stage");
        };
        assert!(failures[0].error.contains("missing exported variable"));
    }

    #[tokio::test]
    async fn partial_build_output_fails_the_action() {
        let deployer = Arc::new(FakeDeployer::default());
        // Declares `image` but the backend reports nothing.
        let runner = PipelineRunner::new(
            Arc::new(FakeSource::default()),
            Arc::new(builder_with("CodeBuild", &[], &[("imageTag", "abc123")])),
            deployer.clone(),
        );

        let report = runner.run(&backend_pipeline()).join.await.unwrap();

        let RunStatus::Failed { stage, .. } = &report.status else {
            panic!("expected failure");
        };
        assert_eq!(stage, "Build");
        assert!(deployer.calls.lock().unwrap().is_empty());

        let StageOutcome::Failed { failures } = &report.stages[1].outcome else {
            panic!("expected failed build stage");
        };
        assert!(failures[0].error.contains("was not produced"));
    }

    #[tokio::test]
    async fn failed_actions_are_reported_exactly() {
        // Four builds in one stage: two fail, two succeed; the next stage
        // never starts.
        let pipeline = Pipeline::new(
            "fanout",
            vec![
                Stage::new("Source", vec![source_action("src", "code")]),
                Stage::new(
                    "Build",
                    vec![
                        build_action("b1", &["code"], &[], &[]),
                        build_action("b2", &["code"], &[], &[]),
                        build_action("b3", &["code"], &[], &[]),
                        build_action("b4", &["code"], &[], &[]),
                    ],
                ),
                Stage::new("After", vec![build_action("b5", &["code"], &[], &[])]),
            ],
        )
        .unwrap();

        let builder = FakeBuilder {
            fail: HashSet::from(["b2".to_string(), "b4".to_string()]),
            ..Default::default()
        };
        let runner = PipelineRunner::new(
            Arc::new(FakeSource::default()),
            Arc::new(builder),
            Arc::new(FakeDeployer::default()),
        );

        let report = runner.run(&pipeline).join.await.unwrap();

        let RunStatus::Failed { stage, actions } = &report.status else {
            panic!("expected failure");
        };
        assert_eq!(stage, "Build");
        let mut failed = actions.clone();
        failed.sort();
        assert_eq!(failed, vec!["b2".to_string(), "b4".to_string()]);
        assert!(matches!(
            report.stages[2].outcome,
            StageOutcome::NotDispatched
        ));
    }

    #[tokio::test]
    async fn stages_run_strictly_in_order_actions_concurrently() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(
            "ordered",
            vec![
                Stage::new("Source", vec![source_action("src", "code")]),
                Stage::new(
                    "One",
                    vec![
                        build_action("a1", &["code"], &[], &[]),
                        build_action("a2", &["code"], &[], &[]),
                    ],
                ),
                Stage::new(
                    "Two",
                    vec![
                        build_action("b1", &["code"], &[], &[]),
                        build_action("b2", &["code"], &[], &[]),
                    ],
                ),
            ],
        )
        .unwrap();

        let builder = FakeBuilder {
            delay: Some(Duration::from_millis(20)),
            log: Some(log.clone()),
            ..Default::default()
        };
        let runner = PipelineRunner::new(
            Arc::new(FakeSource::default()),
            Arc::new(builder),
            Arc::new(FakeDeployer::default()),
        );

        let report = runner.run(&pipeline).join.await.unwrap();
        assert!(report.status.is_success());

        let log = log.lock().unwrap();
        let position = |entry: &str| log.iter().position(|e| e == entry).unwrap();

        // Both stage-one actions start before either finishes: they were
        // dispatched together.
        assert!(position("start:a1") < position("end:a1").min(position("end:a2")));
        assert!(position("start:a2") < position("end:a1").min(position("end:a2")));

        // No stage-two action starts before every stage-one action ended.
        let one_done = position("end:a1").max(position("end:a2"));
        assert!(position("start:b1") > one_done);
        assert!(position("start:b2") > one_done);
    }

    #[tokio::test]
    async fn cancel_stops_dispatch_of_later_stages() {
        let pipeline = Pipeline::new(
            "cancellable",
            vec![
                Stage::new("Source", vec![source_action("src", "code")]),
                Stage::new("One", vec![build_action("slow", &["code"], &[], &[])]),
                Stage::new("Two", vec![build_action("never", &["code"], &[], &[])]),
            ],
        )
        .unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        let builder = FakeBuilder {
            delay: Some(Duration::from_millis(50)),
            log: Some(log.clone()),
            ..Default::default()
        };
        let runner = PipelineRunner::new(
            Arc::new(FakeSource::default()),
            Arc::new(builder),
            Arc::new(FakeDeployer::default()),
        );

        let mut handle = runner.run(&pipeline);
        // Cancel once the slow build stage is actually in flight.
        while let Some(event) = handle.events.recv().await {
            if matches!(&event, RunEvent::StageStarted { stage } if stage == "One") {
                break;
            }
        }
        handle.cancel();
        let report = handle.join.await.unwrap();

        // The in-flight stage ran to completion; the next one never
        // dispatched.
        let RunStatus::Cancelled { after_stage } = &report.status else {
            panic!("expected cancellation, got {:?}", report.status);
        };
        assert_eq!(after_stage.as_deref(), Some("One"));
        assert!(report.stages[1].outcome.is_success());
        assert!(matches!(
            report.stages[2].outcome,
            StageOutcome::NotDispatched
        ));
        assert!(!log.lock().unwrap().iter().any(|e| e == "start:never"));
    }

    #[tokio::test]
    async fn source_failure_halts_the_run() {
        let deployer = Arc::new(FakeDeployer::default());
        let source = FakeSource {
            fail: HashSet::from(["GitHub_Source".to_string()]),
            ..Default::default()
        };
        let runner = PipelineRunner::new(
            Arc::new(source),
            Arc::new(FakeBuilder::default()),
            deployer.clone(),
        );

        let report = runner.run(&backend_pipeline()).join.await.unwrap();

        let RunStatus::Failed { stage, actions } = &report.status else {
            panic!("expected failure");
        };
        assert_eq!(stage, "Source");
        assert_eq!(actions, &vec!["GitHub_Source".to_string()]);
        assert!(deployer.calls.lock().unwrap().is_empty());
    }
}
