//! Ports: the interfaces the orchestrator consumes.
//!
//! - `JobStore`: atomic save/load/list of job records
//! - `Clock`, `IdGenerator`: injected for deterministic tests
//! - `KnowledgeBase`: search service used inside specific agents

pub mod clock;
pub mod id_generator;
pub mod job_store;
pub mod knowledge;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_store::JobStore;
pub use self::knowledge::{KnowledgeBase, KnowledgeError, KnowledgeHit};
