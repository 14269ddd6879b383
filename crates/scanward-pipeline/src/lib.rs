//! Scanward Pipeline
//!
//! Tool dispatch, stage handlers, the stage orchestrator and the intent
//! planner. The orchestrator owns a run's [`PipelineState`] and writes it
//! only between stages.
//!
//! [`PipelineState`]: scanward_core::domain::PipelineState

pub mod dispatcher;
pub mod fakes;
pub mod orchestrator;
pub mod pipeline;
pub mod planner;
pub mod stages;
pub mod web;

pub use dispatcher::{route_sources, Routing, ScanTool, ToolDispatcher};
pub use orchestrator::{PipelineRun, RunStatus, StageOrchestrator};
pub use pipeline::{new_run_id, PipelineJobRunner, SecurityPipeline};
pub use planner::{decode_plan, IntentPlanner, PlanDecision};
pub use stages::{StageContext, StageHandler, StageRegistry};
pub use web::group_web_alerts;
