//! Ordered ledger of explicitly deferred commands.

use super::{CommandData, CommandType};
use std::collections::HashMap;

/// What a conflict key stands for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    /// A command of a given type (and attachment name, if any).
    Command(CommandType, Option<String>),
    /// Any deferred command for the id.
    AnyCommand,
    /// Any deferred command that changes the document body.
    ModifiesDocument,
}

/// Conflict lookup key: a case-normalized document id plus a kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdTypeAndName {
    id: String,
    kind: ConflictKind,
}

impl IdTypeAndName {
    /// Creates a key.
    pub fn new(id: &str, kind: ConflictKind) -> Self {
        Self {
            id: id.to_lowercase(),
            kind,
        }
    }

    /// Key matching any deferred command for `id`.
    pub fn any_command(id: &str) -> Self {
        Self::new(id, ConflictKind::AnyCommand)
    }

    /// Key matching any document-modifying deferred command for `id`.
    pub fn modifies_document(id: &str) -> Self {
        Self::new(id, ConflictKind::ModifiesDocument)
    }

    /// Returns the normalized id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the kind.
    #[must_use]
    pub fn kind(&self) -> &ConflictKind {
        &self.kind
    }
}

/// Deferred commands in submission order, indexed by conflict key.
#[derive(Debug, Clone, Default)]
pub struct DeferredCommands {
    commands: Vec<CommandData>,
    index: HashMap<IdTypeAndName, usize>,
}

impl DeferredCommands {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `command` and indexes it.
    ///
    /// A batch patch is indexed once per target id, as a patch.
    pub fn defer(&mut self, command: CommandData) {
        let position = self.commands.len();
        self.index_command(&command, position);
        self.commands.push(command);
    }

    /// Appends every command of `other`, keeping its order.
    pub fn append(&mut self, other: DeferredCommands) {
        for command in other.commands {
            self.defer(command);
        }
    }

    /// Returns the command registered under `key`.
    #[must_use]
    pub fn get(&self, key: &IdTypeAndName) -> Option<&CommandData> {
        self.index.get(key).and_then(|&position| self.commands.get(position))
    }

    /// Returns a deferred command targeting `id`, if any.
    #[must_use]
    pub fn find_any(&self, id: &str) -> Option<&CommandData> {
        self.get(&IdTypeAndName::any_command(id))
    }

    /// Returns a deferred command that modifies `id`, if any.
    #[must_use]
    pub fn find_modifying(&self, id: &str) -> Option<&CommandData> {
        self.get(&IdTypeAndName::modifies_document(id))
    }

    /// Moves every command out, leaving the ledger empty.
    pub fn take(&mut self) -> DeferredCommands {
        std::mem::take(self)
    }

    /// Iterates over the commands in submission order.
    pub fn iter(&self) -> impl Iterator<Item = &CommandData> {
        self.commands.iter()
    }

    /// Returns the commands as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[CommandData] {
        &self.commands
    }

    /// Returns the number of commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true if no commands are deferred.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    fn index_command(&mut self, command: &CommandData, position: usize) {
        match command {
            CommandData::BatchPatch { ids, .. } => {
                for (id, _) in ids {
                    self.add_keys(id, CommandType::Patch, None, position);
                }
            }
            other => {
                if let Some(id) = other.id() {
                    let name = other.name().map(str::to_string);
                    self.add_keys(id, other.command_type(), name, position);
                }
            }
        }
    }

    fn add_keys(&mut self, id: &str, kind: CommandType, name: Option<String>, position: usize) {
        self.index
            .insert(IdTypeAndName::new(id, ConflictKind::Command(kind, name)), position);
        self.index.insert(IdTypeAndName::any_command(id), position);
        if kind.modifies_document() {
            self.index
                .insert(IdTypeAndName::modifies_document(id), position);
        }
    }
}

impl IntoIterator for DeferredCommands {
    type Item = CommandData;
    type IntoIter = std::vec::IntoIter<CommandData>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.into_iter()
    }
}
