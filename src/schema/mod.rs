//! Schema catalog: collections, key fields, secondary indices, and the
//! upgrade steps that bring an older on-disk store to the current version.

mod catalog;

pub use catalog::{
    collection, CollectionDef, IndexDef, UpgradeStep, AUDIOS, AUDIOS_DEF, COLLECTIONS, FAVORITES,
    FAVORITES_DEF, PODCASTS, PODCASTS_DEF, SCHEMA_VERSION, SESSIONS, SESSIONS_DEF, SUBTITLES,
    SUBTITLES_DEF, UPGRADES,
};
