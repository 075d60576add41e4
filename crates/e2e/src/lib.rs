//! crudcheck E2E Scenarios
//!
//! Drives a live contact manager through a W3C WebDriver endpoint:
//! - Opens and authenticates browser sessions
//! - Reads the rendered contact table as rows
//! - Runs the scenario catalogue, resetting the store before each scenario
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ScenarioRunner (crudcheck-e2e)              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  per scenario:                                              │
//! │    ├── FixtureOrchestrator::reset_to(snapshot)  [common]    │
//! │    ├── Session::open(config) -> Session                     │
//! │    ├── Session::authenticate(credentials)                   │
//! │    ├── Scenario::run(ctx)                                   │
//! │    │     └── ConvergencePoller::await_rows(TableView, ..)   │
//! │    └── Session::close()                                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  WebDriverClient (blocking HTTP, JSON wire protocol)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod runner;
pub mod scenarios;
pub mod session;
pub mod table;
pub mod webdriver;

pub use error::{E2eError, E2eResult};
pub use runner::{ScenarioResult, ScenarioRunner, SuiteResult};
pub use scenarios::{Scenario, ScenarioContext};
pub use session::{Credentials, Element, LoginSurface, Session, SessionConfig};
pub use table::TableView;
pub use webdriver::{Locator, WebDriverClient};
