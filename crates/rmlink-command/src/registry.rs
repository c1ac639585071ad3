use std::collections::HashMap;
use std::sync::OnceLock;

use bytes::Bytes;
use rmlink_frame::Frame;
use tracing::debug;

use crate::catalog::{
    AddSubMsg, AddSubMsgResponse, DelMsg, DelMsgResponse, GetVersion, GetVersionResponse,
    PushPeriodMsg, SdkHeartbeat, SdkHeartbeatResponse, SetSdkConnection,
    SetSdkConnectionResponse, SetSdkMode, SetSdkModeResponse, SubNodeAdd, SubNodeAddResponse,
    SubNodeReset, SubNodeResetResponse,
};
use crate::command::{Command, CommandKind, Direction, Message, WireCommand};
use crate::error::{CommandError, Result};

/// Builds a typed command from a raw payload.
pub type Constructor = fn(Bytes) -> Result<Box<dyn Command>>;

/// One registered `(set, id, direction)` entry.
#[derive(Debug, Clone, Copy)]
pub struct Registration {
    pub name: &'static str,
    pub kind: CommandKind,
    pub construct: Constructor,
}

fn construct<T: WireCommand>(payload: Bytes) -> Result<Box<dyn Command>> {
    T::decode(payload).map(|command| Box::new(command) as Box<dyn Command>)
}

/// `(set, id)` keyed constructors, split into request and response tables.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    requests: HashMap<(u8, u8), Registration>,
    responses: HashMap<(u8, u8), Registration>,
}

impl CommandRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in command.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::new();
        registry.register::<GetVersion>()?;
        registry.register::<GetVersionResponse>()?;
        registry.register::<SetSdkMode>()?;
        registry.register::<SetSdkModeResponse>()?;
        registry.register::<SetSdkConnection>()?;
        registry.register::<SetSdkConnectionResponse>()?;
        registry.register::<SdkHeartbeat>()?;
        registry.register::<SdkHeartbeatResponse>()?;
        registry.register::<SubNodeAdd>()?;
        registry.register::<SubNodeAddResponse>()?;
        registry.register::<SubNodeReset>()?;
        registry.register::<SubNodeResetResponse>()?;
        registry.register::<AddSubMsg>()?;
        registry.register::<AddSubMsgResponse>()?;
        registry.register::<DelMsg>()?;
        registry.register::<DelMsgResponse>()?;
        registry.register::<PushPeriodMsg>()?;
        Ok(registry)
    }

    /// Register a typed command under its own `(set, id, direction)`.
    pub fn register<T: WireCommand>(&mut self) -> Result<()> {
        self.register_raw(
            T::SET,
            T::ID,
            T::DIRECTION,
            Registration {
                name: T::NAME,
                kind: T::KIND,
                construct: construct::<T>,
            },
        )
    }

    /// Register an explicit constructor.
    ///
    /// The wire protocol is fixed, so a second registration for the same key
    /// is rejected rather than replacing the first.
    pub fn register_raw(
        &mut self,
        set: u8,
        id: u8,
        direction: Direction,
        registration: Registration,
    ) -> Result<()> {
        let table = self.table_mut(direction);
        if let Some(existing) = table.get(&(set, id)) {
            return Err(CommandError::DuplicateCommand {
                set,
                id,
                direction,
                name: existing.name,
            });
        }
        table.insert((set, id), registration);
        Ok(())
    }

    /// Look up a registration.
    pub fn lookup(&self, set: u8, id: u8, direction: Direction) -> Option<&Registration> {
        self.table(direction).get(&(set, id))
    }

    /// Kind of a registered command, if known.
    pub fn kind_of(&self, set: u8, id: u8, direction: Direction) -> Option<CommandKind> {
        self.lookup(set, id, direction).map(|entry| entry.kind)
    }

    /// Decode an envelope's payload, picking the table from its response bit.
    pub fn decode(&self, frame: Frame) -> Result<Message> {
        let direction = Direction::of(&frame);
        let entry = self
            .lookup(frame.cmd_set, frame.cmd_id, direction)
            .ok_or(CommandError::UnknownCommand {
                set: frame.cmd_set,
                id: frame.cmd_id,
                direction,
            })?;
        let command = (entry.construct)(frame.payload.clone())?;
        debug!(
            command = entry.name,
            %direction,
            seq = frame.seq,
            "decoded command"
        );
        Ok(Message::new(frame, command))
    }

    /// Number of registered entries across both tables.
    pub fn len(&self) -> usize {
        self.requests.len() + self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.responses.is_empty()
    }

    /// Registered entries as `(set, id, direction, registration)`, sorted.
    pub fn entries(&self) -> Vec<(u8, u8, Direction, Registration)> {
        let mut entries: Vec<_> = self
            .requests
            .iter()
            .map(|(&(set, id), entry)| (set, id, Direction::Request, *entry))
            .chain(
                self.responses
                    .iter()
                    .map(|(&(set, id), entry)| (set, id, Direction::Response, *entry)),
            )
            .collect();
        entries.sort_by_key(|&(set, id, direction, _)| (set, id, direction == Direction::Response));
        entries
    }

    fn table(&self, direction: Direction) -> &HashMap<(u8, u8), Registration> {
        match direction {
            Direction::Request => &self.requests,
            Direction::Response => &self.responses,
        }
    }

    fn table_mut(&mut self, direction: Direction) -> &mut HashMap<(u8, u8), Registration> {
        match direction {
            Direction::Request => &mut self.requests,
            Direction::Response => &mut self.responses,
        }
    }
}

static REGISTRY: OnceLock<CommandRegistry> = OnceLock::new();

/// Build the process-wide registry from the built-in catalog.
///
/// Idempotent; every call after the first returns the same registry.
///
/// # Panics
///
/// Panics if the built-in catalog registers one key twice.
pub fn register_all() -> &'static CommandRegistry {
    REGISTRY.get_or_init(|| {
        CommandRegistry::builtin()
            .unwrap_or_else(|err| panic!("inconsistent built-in command table: {err}"))
    })
}

/// The process-wide registry, if [`register_all`] has run.
pub fn registry() -> Option<&'static CommandRegistry> {
    REGISTRY.get()
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::catalog::{SET_SDK, SET_SUBSCRIPTION};

    #[test]
    fn builtin_catalog_is_complete() {
        let registry = CommandRegistry::builtin().unwrap();
        assert_eq!(registry.len(), 17);
        assert_eq!(
            registry.kind_of(SET_SUBSCRIPTION, 0x08, Direction::Request),
            Some(CommandKind::Push)
        );
        assert_eq!(
            registry.kind_of(SET_SDK, 0xd5, Direction::Request),
            Some(CommandKind::Pull)
        );
        assert!(registry
            .lookup(SET_SUBSCRIPTION, 0x08, Direction::Response)
            .is_none());
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = CommandRegistry::new();
        registry.register::<GetVersion>().unwrap();
        let err = registry.register::<GetVersion>().unwrap_err();
        assert!(matches!(
            err,
            CommandError::DuplicateCommand {
                set: 0x00,
                id: 0x01,
                direction: Direction::Request,
                name: "get_version"
            }
        ));
        registry.register::<GetVersionResponse>().unwrap();
    }

    #[test]
    fn decode_picks_table_from_response_bit() {
        let registry = CommandRegistry::builtin().unwrap();
        let request = Frame::request(0x09, 0x38, 10001, true, 0x00, 0x01, Bytes::new());
        let message = registry.decode(request.clone()).unwrap();
        assert!(message.downcast_ref::<GetVersion>().is_some());

        let response = request.response(vec![0u8, 1, 2, 3, 4]);
        let message = registry.decode(response).unwrap();
        let version = message.downcast_ref::<GetVersionResponse>().unwrap();
        assert!(message.ok());
        assert_eq!(version.version, [1, 2, 3, 4]);
        assert_eq!(message.frame().seq, 10001);
    }

    #[test]
    fn unknown_command_reported() {
        let registry = CommandRegistry::builtin().unwrap();
        let frame = Frame::request(0x09, 0x38, 1, false, 0x3f, 0x99, Bytes::new());
        assert!(matches!(
            registry.decode(frame).unwrap_err(),
            CommandError::UnknownCommand {
                set: 0x3f,
                id: 0x99,
                direction: Direction::Request
            }
        ));
    }

    #[test]
    fn typed_payload_roundtrips_through_registry() {
        let registry = CommandRegistry::builtin().unwrap();
        let mode = SetSdkMode { enable: true };
        let frame = Frame::request(0x09, 0x38, 7, true, SET_SDK, 0xd1, mode.payload());
        let message = registry.decode(frame).unwrap();
        assert_eq!(message.downcast_ref::<SetSdkMode>(), Some(&mode));
        assert_eq!(message.command().name(), "set_sdk_mode");

        let mut raw = BytesMut::new();
        mode.encode(&mut raw);
        assert_eq!(raw.as_ref(), &[1]);
    }

    #[test]
    fn global_registry_initialised_once() {
        let first = register_all() as *const CommandRegistry;
        let second = register_all() as *const CommandRegistry;
        assert_eq!(first, second);
        assert!(registry().is_some());
    }
}
