//! User content carried across updates: tilesets, soundpacks, mods, fonts.

mod identity;
mod reconcile;

pub use identity::{
    ContentIdentity, ContentKind, FontIdentity, IdentityExtractor, ModIdentity, SoundpackIdentity,
    TilesetIdentity,
};
pub use reconcile::{reconcile_directory, scan, ReconcileReport};
