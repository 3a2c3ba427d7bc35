pub mod error;
pub mod provision;
pub mod rules;
pub mod schema;
pub mod seed;
pub mod store;
pub mod validation;

pub use error::{FormationError, Result};
pub use provision::{reconcile, ReconcileMode};
pub use schema::{parse_formation, parse_formation_str, Formation};
pub use seed::{parse_plan, parse_plan_str, seed, SeedPlan, SeedRecord};
pub use store::{ProvisionedCollection, Record, SqliteStore, StoreAdapter};
