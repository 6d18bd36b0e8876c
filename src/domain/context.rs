use super::AuditEvent;
use uuid::Uuid;

/// Actor/machine/session identity stamped onto every event a producer emits.
///
/// Detected once at session start and applied to events as they are created,
/// so the hot enqueue path never touches the OS.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user_name: Option<String>,
    pub machine_name: Option<String>,
    pub user_domain: Option<String>,
    pub session_id: String,
}

impl SessionContext {
    /// Detects identity from the environment and mints a fresh session id.
    pub fn detect() -> Self {
        let user_name = std::env::var("USERNAME")
            .or_else(|_| std::env::var("USER"))
            .ok();
        let machine_name = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok());
        let user_domain = std::env::var("USERDOMAIN").ok();

        Self {
            user_name,
            machine_name,
            user_domain,
            session_id: format!("sess_{}", Uuid::new_v4().simple()),
        }
    }

    /// Fills in the identity fields of `event` that are still unset.
    pub fn apply(&self, event: &mut AuditEvent) {
        if event.user_name.is_none() {
            event.user_name.clone_from(&self.user_name);
        }
        if event.machine_name.is_none() {
            event.machine_name.clone_from(&self.machine_name);
        }
        if event.user_domain.is_none() {
            event.user_domain.clone_from(&self.user_domain);
        }
        if event.session_id.is_none() {
            event.session_id = Some(self.session_id.clone());
        }
    }
}
