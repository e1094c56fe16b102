//! User aggregate (event-sourced).
//!
//! Decisions (`register_user`, `deactivate_user`, `touch`) return events and
//! never mutate the aggregate; state only changes through `apply`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};
use tracing::debug;

use stratum_core::aggregate::UNHYDRATED_VERSION;
use stratum_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use stratum_events::Event;

use crate::password::{constant_time_eq, hash_password};
use crate::role::Role;

pub const USER_REGISTERED: &str = "UserRegistered";
pub const USER_DEACTIVATED: &str = "UserDeactivated";
pub const USER_UPDATED: &str = "UserUpdated";

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterUser {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role: Option<Role>,
}

impl RegisterUser {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            role: None,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UserCommand {
    Register(RegisterUser),
    Deactivate,
    Touch(Map<String, JsonValue>),
}

/// Serializable aggregate state, as stored in snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserState {
    pub id: Option<AggregateId>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub is_active: bool,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    id: Option<AggregateId>,
    email: Option<String>,
    password_hash: Option<String>,
    is_active: bool,
    role: Role,
    version: i64,
}

impl Default for User {
    fn default() -> Self {
        Self {
            id: None,
            email: None,
            password_hash: None,
            is_active: false,
            role: Role::Customer,
            version: UNHYDRATED_VERSION,
        }
    }
}

impl User {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a user by applying `events` in order.
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut user = Self::new();
        for event in events {
            user.apply(event);
        }
        user
    }

    /// Restore a user from snapshot state taken at `version`.
    pub fn from_snapshot(state: UserState, version: u64) -> Self {
        Self {
            id: state.id,
            email: state.email,
            password_hash: state.password_hash,
            is_active: state.is_active,
            role: state.role,
            version: to_aggregate_version(version),
        }
    }

    pub fn state(&self) -> UserState {
        UserState {
            id: self.id.clone(),
            email: self.email.clone(),
            password_hash: self.password_hash.clone(),
            is_active: self.is_active,
            role: self.role,
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn password_hash(&self) -> Option<&str> {
        self.password_hash.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_registered(&self) -> bool {
        self.id.is_some()
    }

    pub fn verify_password(&self, candidate: &str) -> bool {
        match &self.password_hash {
            Some(stored) => constant_time_eq(stored, &hash_password(candidate)),
            None => false,
        }
    }

    pub fn register_user(&self, cmd: &RegisterUser) -> Result<Event, DomainError> {
        if self.is_registered() {
            return Err(DomainError::invariant("user is already registered"));
        }
        if !cmd.email.contains('@') {
            return Err(DomainError::validation("invalid email address"));
        }
        if cmd.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(DomainError::validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters long"
            )));
        }

        let role = cmd.role.unwrap_or_default();
        Ok(self.next_event(
            USER_REGISTERED,
            object(json!({
                "email": cmd.email,
                "passwordHash": hash_password(&cmd.password),
                "role": role,
            })),
        ))
    }

    /// `None` when the user is already inactive.
    pub fn deactivate_user(&self) -> Option<Event> {
        if !self.is_active {
            return None;
        }
        Some(self.next_event(USER_DEACTIVATED, Map::new()))
    }

    /// Record an update carrying `data`; only the version moves.
    pub fn touch(&self, data: Map<String, JsonValue>) -> Result<Event, DomainError> {
        if !self.is_registered() {
            return Err(DomainError::invariant("user is not registered"));
        }
        Ok(self.next_event(USER_UPDATED, data))
    }

    fn next_event(&self, event_type: &str, data: Map<String, JsonValue>) -> Event {
        let aggregate_id = self.id.clone().unwrap_or_else(AggregateId::generate);
        let version = u64::try_from(self.version + 1).unwrap_or(0);
        Event::new(event_type, aggregate_id, version, data)
    }

    fn apply_registered(&mut self, event: &Event) {
        self.id = Some(event.aggregate_id().clone());
        self.email = event.data_str("email").map(str::to_owned);
        self.password_hash = event.data_str("passwordHash").map(str::to_owned);
        self.role = event
            .data_str("role")
            .and_then(|role| role.parse().ok())
            .unwrap_or_default();
        self.is_active = true;
    }
}

fn object(value: JsonValue) -> Map<String, JsonValue> {
    match value {
        JsonValue::Object(map) => map,
        _ => Map::new(),
    }
}

fn to_aggregate_version(version: u64) -> i64 {
    i64::try_from(version).unwrap_or(i64::MAX)
}

impl AggregateRoot for User {
    type Id = AggregateId;

    fn id(&self) -> Option<&Self::Id> {
        self.id.as_ref()
    }

    fn version(&self) -> i64 {
        self.version
    }
}

impl Aggregate for User {
    type Command = UserCommand;
    type Event = Event;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event.event_type() {
            USER_REGISTERED => self.apply_registered(event),
            USER_DEACTIVATED => self.is_active = false,
            USER_UPDATED => {}
            other => debug!(event_type = other, "ignoring unknown event type"),
        }
        self.version = to_aggregate_version(event.version());
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            UserCommand::Register(cmd) => self.register_user(cmd).map(|e| vec![e]),
            UserCommand::Deactivate => Ok(self.deactivate_user().into_iter().collect()),
            UserCommand::Touch(data) => self.touch(data.clone()).map(|e| vec![e]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registered_user() -> (User, Event) {
        let event = User::new()
            .register_user(&RegisterUser::new("test@example.com", "password123"))
            .unwrap();
        (User::from_events([&event]), event)
    }

    #[test]
    fn register_user_emits_registered_event_without_raw_password() {
        let user = User::new();
        let event = user
            .register_user(&RegisterUser::new("test@example.com", "password123"))
            .unwrap();

        assert_eq!(event.event_type(), USER_REGISTERED);
        assert_eq!(event.version(), 0);
        assert_eq!(event.data_str("email"), Some("test@example.com"));
        assert_eq!(event.data_str("role"), Some("customer"));
        assert_eq!(event.data_str("passwordHash"), Some(hash_password("password123").as_str()));
        assert!(event.data().get("password").is_none());
        // Deciding does not change state.
        assert_eq!(user.version(), UNHYDRATED_VERSION);
    }

    #[test]
    fn register_user_rejects_invalid_email() {
        let err = User::new()
            .register_user(&RegisterUser::new("not-an-email", "password123"))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn register_user_rejects_short_password() {
        let err = User::new()
            .register_user(&RegisterUser::new("test@example.com", "short"))
            .unwrap_err();
        let DomainError::Validation(msg) = err else {
            panic!("expected validation error");
        };
        assert!(msg.contains("at least 8"));
    }

    #[test]
    fn cannot_register_twice() {
        let (user, _) = registered_user();
        let err = user
            .register_user(&RegisterUser::new("other@example.com", "password123"))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn apply_registered_sets_state() {
        let (user, event) = registered_user();
        assert_eq!(user.id(), Some(event.aggregate_id()));
        assert_eq!(user.email(), Some("test@example.com"));
        assert!(user.is_active());
        assert_eq!(user.role(), Role::Customer);
        assert_eq!(user.version(), 0);
        assert!(user.verify_password("password123"));
        assert!(!user.verify_password("wrong-password"));
    }

    #[test]
    fn admin_role_is_carried_through() {
        let user = User::new();
        let event = user
            .register_user(&RegisterUser::new("root@example.com", "password123").with_role(Role::Admin))
            .unwrap();
        let user = User::from_events([&event]);
        assert_eq!(user.role(), Role::Admin);
    }

    #[test]
    fn applying_the_same_event_twice_is_harmless() {
        let (mut user, event) = registered_user();
        let before = user.clone();
        user.apply(&event);
        assert_eq!(user, before);
    }

    #[test]
    fn deactivate_is_idempotent() {
        let (mut user, _) = registered_user();
        let Some(event) = user.deactivate_user() else {
            panic!("expected a deactivation event");
        };
        assert_eq!(event.event_type(), USER_DEACTIVATED);
        assert_eq!(event.version(), 1);

        user.apply(&event);
        assert!(!user.is_active());
        assert!(user.deactivate_user().is_none());
    }

    #[test]
    fn touch_only_moves_version() {
        let (mut user, first) = registered_user();
        let mut data = Map::new();
        data.insert("note".into(), json!("hello"));
        let event = user.touch(data).unwrap();
        assert_eq!(event.aggregate_id(), first.aggregate_id());

        let before = user.state();
        user.apply(&event);
        assert_eq!(user.state(), before);
        assert_eq!(user.version(), 1);

        assert!(User::new().touch(Map::new()).is_err());
    }

    #[test]
    fn snapshot_state_round_trips() {
        let (mut user, _) = registered_user();
        let event = user.deactivate_user().unwrap();
        user.apply(&event);

        let restored = User::from_snapshot(user.state(), 1);
        assert_eq!(restored, user);

        let json = serde_json::to_value(user.state()).unwrap();
        assert_eq!(json["isActive"], false);
        assert_eq!(json["email"], "test@example.com");
    }

    #[test]
    fn handle_dispatches_commands() {
        let registered = User::new()
            .handle(&UserCommand::Register(RegisterUser::new("a@example.com", "password123")))
            .unwrap();
        assert_eq!(registered.len(), 1);

        let mut user = User::from_events(&registered);
        let events = user.handle(&UserCommand::Deactivate).unwrap();
        assert_eq!(events.len(), 1);
        user.apply(&events[0]);
        assert!(user.handle(&UserCommand::Deactivate).unwrap().is_empty());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: registration accepts exactly emails with '@' and passwords of 8+ chars.
            #[test]
            fn registration_validation(
                local in "[a-z]{0,8}",
                has_at in any::<bool>(),
                password in "[a-zA-Z0-9]{0,16}"
            ) {
                let email = if has_at { format!("{local}@example.com") } else { local };
                let result = User::new().register_user(&RegisterUser::new(email, password.clone()));
                prop_assert_eq!(result.is_ok(), has_at && password.len() >= 8);
            }
        }
    }
}
