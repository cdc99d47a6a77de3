//! Session lifecycle.
//!
//! One [`SessionOrchestrator`] actor per registry scope owns the engine
//! adapter, the media state aggregator and the error normalizer for that
//! session. Callers talk to it through the cloneable
//! [`SessionOrchestratorHandle`]; every request is answered in the order it
//! was received.
//!
//! ```text
//! SessionOrchestratorHandle (clone per caller)
//! └── SessionOrchestrator (actor task)
//!     ├── EngineAdapter ──► MediaProvider
//!     ├── MediaStateAggregator ◄── engine events (pump task)
//!     └── ErrorNormalizer (rolling log)
//! ```

pub mod messages;
pub mod orchestrator;
pub mod state;

pub use messages::MediaToggle;
pub use orchestrator::{SessionOrchestrator, SessionOrchestratorHandle};
pub use state::{JoinPlan, LeavePlan, SessionPhase, SessionState, SessionStatus};
