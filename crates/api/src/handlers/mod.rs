pub mod executions;
pub mod health;
pub mod workflows;

use super::AppState;
