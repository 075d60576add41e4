//! Scenario catalogue for the contact manager
//!
//! Each scenario names the snapshot it starts from and whether it needs an
//! authenticated session. Waits on rendered state go through the convergence
//! poller; nothing sleeps for a fixed time.

use crudcheck_common::{ConvergencePoller, FixtureSnapshot, RowExpectation, RowMatch, RowSource};
use tracing::info;

use crate::error::{E2eError, E2eResult};
use crate::session::Session;
use crate::table::TableView;

/// Application pages and controls
pub mod page {
    use crate::webdriver::Locator;

    pub const INDEX: &str = "/index.php";
    pub const INDEX_PATTERN: &str = "index.php";
    pub const LOGIN_PATTERN: &str = "login.php";
    pub const CREATE_PATTERN: &str = "create.php";
    pub const UPDATE_PATTERN: &str = "update.php";
    pub const DELETE_PATTERN: &str = "delete.php";

    pub fn create_button() -> Locator {
        Locator::class("create-contact")
    }

    pub fn field(name: &str) -> Locator {
        Locator::id(name)
    }

    pub fn create_submit() -> Locator {
        Locator::css("input[type='submit']")
    }

    pub fn update_submit() -> Locator {
        Locator::css("input[value='Update']")
    }

    pub fn login_username() -> Locator {
        Locator::id("inputUsername")
    }

    /// Headers every contact table must show
    pub const CONTACT_HEADERS: [&str; 5] = ["#", "Name", "Email", "Phone", "Title"];
}

/// What a running scenario can reach
pub struct ScenarioContext<'a> {
    pub session: &'a Session,
    pub poller: ConvergencePoller,
}

impl<'a> ScenarioContext<'a> {
    pub fn new(session: &'a Session, poller: ConvergencePoller) -> Self {
        Self { session, poller }
    }

    pub fn table(&self) -> TableView<'a> {
        TableView::new(self.session)
    }
}

pub trait Scenario: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn requires_login(&self) -> bool {
        true
    }

    /// Store contents the scenario starts from
    fn snapshot(&self) -> FixtureSnapshot {
        FixtureSnapshot::contacts()
    }

    fn run(&self, ctx: &ScenarioContext<'_>) -> E2eResult<()>;
}

fn ensure(condition: bool, message: impl FnOnce() -> String) -> E2eResult<()> {
    if condition {
        Ok(())
    } else {
        Err(E2eError::AssertionFailed(message()))
    }
}

fn ensure_url(session: &Session, pattern: &str) -> E2eResult<String> {
    let url = session.current_url()?;
    ensure(url.contains(pattern), || format!("expected URL containing {:?}, at {}", pattern, url))?;
    Ok(url)
}

/// Values typed into the contact form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactForm {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub title: Option<String>,
}

impl ContactForm {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            phone: None,
            title: None,
        }
    }

    pub fn phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    fn fields(&self) -> Vec<(&'static str, &str)> {
        let mut fields = vec![("name", self.name.as_str()), ("email", self.email.as_str())];
        if let Some(phone) = &self.phone {
            fields.push(("phone", phone.as_str()));
        }
        if let Some(title) = &self.title {
            fields.push(("title", title.as_str()));
        }
        fields
    }

    /// Replace the content of each field on the open form
    pub fn fill(&self, session: &Session) -> E2eResult<()> {
        for (field, value) in self.fields() {
            session.find(&page::field(field))?.fill(value)?;
        }
        Ok(())
    }

    /// Matches the rendered row for this contact
    pub fn row_match(&self) -> RowMatch {
        RowMatch::new()
            .field("name", self.name.clone())
            .field("email", self.email.clone())
    }
}

/// Open the create form from the dashboard, submit `form`, and wait for the
/// redirect back.
fn submit_new_contact(ctx: &ScenarioContext<'_>, form: &ContactForm) -> E2eResult<()> {
    let session = ctx.session;
    session.wait_for(&page::create_button())?.click()?;
    session.wait_for(&page::field("name"))?;
    ensure_url(session, page::CREATE_PATTERN)?;

    form.fill(session)?;
    session.find(&page::create_submit())?.click()?;
    session.wait_for_url(page::INDEX_PATTERN, &ctx.poller)?;
    Ok(())
}

pub struct ViewContactList;

impl Scenario for ViewContactList {
    fn name(&self) -> &'static str {
        "view-contact-list"
    }

    fn description(&self) -> &'static str {
        "Dashboard lists contacts with all columns"
    }

    fn run(&self, ctx: &ScenarioContext<'_>) -> E2eResult<()> {
        ensure_url(ctx.session, page::INDEX_PATTERN)?;

        let table = ctx.table();
        table.wait_until_loaded()?;

        let headers = table.headers()?;
        for expected in page::CONTACT_HEADERS {
            ensure(headers.iter().any(|h| h.contains(expected)), || {
                format!("header {:?} missing from {:?}", expected, headers)
            })?;
        }

        let rows = table.rows()?;
        ensure(!rows.is_empty(), || "contact table is empty".to_string())?;
        ensure(rows[0].len() >= 5, || format!("first row has too few cells: {:?}", rows[0]))?;

        info!("Contact table shows {} row(s)", rows.len());
        Ok(())
    }
}

pub struct CreateContact;

impl CreateContact {
    pub fn form() -> ContactForm {
        ContactForm::new("Sarah Williams", "sarah.williams@email.com")
            .phone("08555555555")
            .title("DevOps Engineer")
    }
}

impl Scenario for CreateContact {
    fn name(&self) -> &'static str {
        "create-contact"
    }

    fn description(&self) -> &'static str {
        "A contact added through the form appears in the table"
    }

    fn run(&self, ctx: &ScenarioContext<'_>) -> E2eResult<()> {
        let form = Self::form();
        submit_new_contact(ctx, &form)?;

        let mut table = ctx.table();
        let converged = ctx
            .poller
            .await_rows(&mut table, &RowExpectation::Present(form.row_match()))?;

        info!("{} visible after {} attempt(s)", form.name, converged.attempts);
        Ok(())
    }
}

pub struct UpdateContact;

impl UpdateContact {
    pub fn form() -> ContactForm {
        ContactForm::new("Alice Updated", "alice.updated@email.com")
    }
}

impl Scenario for UpdateContact {
    fn name(&self) -> &'static str {
        "update-contact"
    }

    fn description(&self) -> &'static str {
        "Editing the first contact shows the new values in the table"
    }

    fn run(&self, ctx: &ScenarioContext<'_>) -> E2eResult<()> {
        let session = ctx.session;
        let mut table = ctx.table();
        table.wait_until_loaded()?;

        let edit = table
            .row_link(0, page::UPDATE_PATTERN)?
            .ok_or_else(|| E2eError::AssertionFailed("first row has no edit link".to_string()))?;

        session.navigate(&edit)?;
        session.wait_for(&page::field("name"))?;
        ensure_url(session, page::UPDATE_PATTERN)?;

        let form = Self::form();
        form.fill(session)?;
        session.find(&page::update_submit())?.click()?;
        session.wait_for_url(page::INDEX_PATTERN, &ctx.poller)?;

        let converged = ctx
            .poller
            .await_rows(&mut table, &RowExpectation::Present(form.row_match()))?;

        info!("{} visible after {} attempt(s)", form.name, converged.attempts);
        Ok(())
    }
}

pub struct DeleteContact;

impl Scenario for DeleteContact {
    fn name(&self) -> &'static str {
        "delete-contact"
    }

    fn description(&self) -> &'static str {
        "Deleting the first contact removes it from the table"
    }

    fn run(&self, ctx: &ScenarioContext<'_>) -> E2eResult<()> {
        let session = ctx.session;
        let mut table = ctx.table();
        table.wait_until_loaded()?;

        let before = table.rows()?;
        let initial = before.len();
        ensure(initial > 0, || "no contact to delete".to_string())?;
        let name = before[0]
            .get("name")
            .filter(|name| !name.is_empty())
            .cloned()
            .ok_or_else(|| E2eError::AssertionFailed("first row has no name cell".to_string()))?;

        let delete = table
            .row_link(0, page::DELETE_PATTERN)?
            .ok_or_else(|| E2eError::AssertionFailed("first row has no delete link".to_string()))?;

        session.navigate(&delete)?;
        session.wait_for_url(page::INDEX_PATTERN, &ctx.poller)?;

        let converged = ctx
            .poller
            .await_rows(&mut table, &RowExpectation::CountBelow(initial))?;

        let gone = RowExpectation::Absent(RowMatch::new().field("name", name.clone()));
        ensure(gone.is_met(&converged.sample), || format!("{:?} still listed", name))?;
        let latest = table.query_rows()?;
        ensure(gone.is_met(&latest), || format!("{:?} listed again", name))?;

        info!("{} removed ({} -> {} rows)", name, initial, latest.len());
        Ok(())
    }
}

pub struct ProtectedPageRedirect;

impl Scenario for ProtectedPageRedirect {
    fn name(&self) -> &'static str {
        "protected-page-redirect"
    }

    fn description(&self) -> &'static str {
        "The dashboard redirects to the login page without a session"
    }

    fn requires_login(&self) -> bool {
        false
    }

    fn run(&self, ctx: &ScenarioContext<'_>) -> E2eResult<()> {
        let session = ctx.session;
        session.open_page(page::INDEX)?;
        session.wait_for(&page::login_username())?;
        ensure_url(session, page::LOGIN_PATTERN)?;
        Ok(())
    }
}

pub struct CrudWorkflow;

impl CrudWorkflow {
    pub fn form() -> ContactForm {
        ContactForm::new("Integration Test Contact", "integration@test.com")
            .phone("08999999999")
            .title("Test User")
    }
}

impl Scenario for CrudWorkflow {
    fn name(&self) -> &'static str {
        "crud-workflow"
    }

    fn description(&self) -> &'static str {
        "Read the dashboard, create a contact, and see the count grow"
    }

    fn run(&self, ctx: &ScenarioContext<'_>) -> E2eResult<()> {
        let mut table = ctx.table();
        table.wait_until_loaded()?;
        let initial = table.rows()?.len();

        submit_new_contact(ctx, &Self::form())?;

        let converged = ctx
            .poller
            .await_rows(&mut table, &RowExpectation::CountAbove(initial))?;

        info!("Contacts: {} -> {}", initial, converged.sample.len());
        Ok(())
    }
}

/// Every scenario, in run order
pub fn catalogue() -> Vec<Box<dyn Scenario>> {
    vec![
        Box::new(ViewContactList),
        Box::new(ProtectedPageRedirect),
        Box::new(CreateContact),
        Box::new(UpdateContact),
        Box::new(DeleteContact),
        Box::new(CrudWorkflow),
    ]
}

pub fn find(name: &str) -> Option<Box<dyn Scenario>> {
    catalogue().into_iter().find(|s| s.name() == name)
}
