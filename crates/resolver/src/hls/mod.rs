pub mod playlist;

pub use playlist::{
    ParsedPlaylist, PlaylistKind, PlaylistVariant, classify_playlist, parse_attributes,
    parse_audio_tracks, parse_master_playlist, parse_playlist,
};
