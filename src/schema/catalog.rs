//! Static catalog of collections and schema upgrade steps.

/// Collection names.
pub const SESSIONS: &str = "sessions";
pub const AUDIOS: &str = "audios";
pub const SUBTITLES: &str = "subtitles";
pub const PODCASTS: &str = "podcasts";
pub const FAVORITES: &str = "favorites";

/// A declared secondary index on a collection field.
///
/// Indices are declarative: queries sort in memory after a full scan, but
/// only declared fields may be sorted on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexDef {
    pub field: &'static str,
    pub unique: bool,
}

/// Declaration of one collection.
#[derive(Debug)]
pub struct CollectionDef {
    pub name: &'static str,

    /// Primary key field within the record.
    pub key_field: &'static str,

    pub indices: &'static [IndexDef],

    /// Whether records carry a sidecar payload (blob collections).
    pub payload: bool,
}

impl CollectionDef {
    /// File name of this collection's log within the store directory.
    pub fn log_file(&self) -> String {
        format!("{}.log", self.name)
    }

    /// Directory name for sidecar payload files, if any.
    pub fn payload_dir(&self) -> Option<String> {
        self.payload.then(|| format!("{}-payloads", self.name))
    }

    pub fn has_index(&self, field: &str) -> bool {
        self.indices.iter().any(|index| index.field == field)
    }
}

pub static SESSIONS_DEF: CollectionDef = CollectionDef {
    name: SESSIONS,
    key_field: "id",
    indices: &[
        IndexDef { field: "lastOpenedAt", unique: false },
        IndexDef { field: "createdAt", unique: false },
    ],
    payload: false,
};

pub static AUDIOS_DEF: CollectionDef = CollectionDef {
    name: AUDIOS,
    key_field: "id",
    indices: &[IndexDef { field: "createdAt", unique: false }],
    payload: true,
};

pub static SUBTITLES_DEF: CollectionDef = CollectionDef {
    name: SUBTITLES,
    key_field: "id",
    indices: &[IndexDef { field: "createdAt", unique: false }],
    payload: true,
};

pub static PODCASTS_DEF: CollectionDef = CollectionDef {
    name: PODCASTS,
    key_field: "feedUrl",
    indices: &[
        IndexDef { field: "addedAt", unique: false },
        IndexDef { field: "title", unique: false },
    ],
    payload: false,
};

pub static FAVORITES_DEF: CollectionDef = CollectionDef {
    name: FAVORITES,
    key_field: "key",
    indices: &[
        IndexDef { field: "addedAt", unique: false },
        IndexDef { field: "feedUrl", unique: false },
    ],
    payload: false,
};

/// All collections at the current schema version.
pub static COLLECTIONS: [&CollectionDef; 5] = [
    &SESSIONS_DEF,
    &AUDIOS_DEF,
    &SUBTITLES_DEF,
    &PODCASTS_DEF,
    &FAVORITES_DEF,
];

/// One schema upgrade step. Steps only create collections that are missing;
/// they never touch data in collections that already exist.
#[derive(Debug)]
pub struct UpgradeStep {
    pub version: u32,
    pub creates: &'static [&'static CollectionDef],
}

/// Ordered upgrade steps. Playback collections came first; the podcast
/// feature (subscriptions and favorites) arrived in version 2.
pub static UPGRADES: [UpgradeStep; 2] = [
    UpgradeStep {
        version: 1,
        creates: &[&SESSIONS_DEF, &AUDIOS_DEF, &SUBTITLES_DEF],
    },
    UpgradeStep {
        version: 2,
        creates: &[&PODCASTS_DEF, &FAVORITES_DEF],
    },
];

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 2;

/// Look up a collection declaration by name.
pub fn collection(name: &str) -> Option<&'static CollectionDef> {
    COLLECTIONS.iter().copied().find(|def| def.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_version_matches_last_step() {
        assert_eq!(SCHEMA_VERSION, UPGRADES.last().unwrap().version);
    }

    #[test]
    fn upgrade_versions_are_strictly_increasing() {
        for pair in UPGRADES.windows(2) {
            assert!(pair[0].version < pair[1].version);
        }
    }

    #[test]
    fn every_collection_is_created_by_some_step() {
        for def in COLLECTIONS {
            let created = UPGRADES
                .iter()
                .any(|step| step.creates.iter().any(|c| c.name == def.name));
            assert!(created, "{} is never created", def.name);
        }
    }

    #[test]
    fn collection_lookup() {
        assert_eq!(collection("sessions").unwrap().key_field, "id");
        assert_eq!(collection("favorites").unwrap().key_field, "key");
        assert!(collection("nonexistent").is_none());
    }

    #[test]
    fn declared_indices() {
        let sessions = collection("sessions").unwrap();
        assert!(sessions.has_index("lastOpenedAt"));
        assert!(sessions.has_index("createdAt"));
        assert!(!sessions.has_index("progress"));

        let podcasts = collection("podcasts").unwrap();
        assert!(podcasts.has_index("title"));
    }

    #[test]
    fn payload_dirs_only_for_blob_collections() {
        assert_eq!(AUDIOS_DEF.payload_dir().unwrap(), "audios-payloads");
        assert!(SESSIONS_DEF.payload_dir().is_none());
    }
}
