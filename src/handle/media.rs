//! Media configuration for offer/answer preparation.
//!
//! A renegotiation request describes, per kind, whether the existing track
//! is kept, added, removed or replaced. [`normalize`] folds the request
//! flags against the current local tracks into a stable form; running it
//! twice over the same inputs yields the same result.

use crate::error::ClientError;
use crate::peer::MediaKind;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaConfig {
    /// Master switches; `None` means enabled.
    pub audio: Option<bool>,
    pub video: Option<bool>,
    pub data: Option<bool>,

    pub audio_send: Option<bool>,
    pub audio_recv: Option<bool>,
    pub video_send: Option<bool>,
    pub video_recv: Option<bool>,

    pub add_audio: bool,
    pub remove_audio: bool,
    pub replace_audio: bool,
    pub add_video: bool,
    pub remove_video: bool,
    pub replace_video: bool,
    pub add_data: bool,

    /// Set by the resolver: renegotiation of an existing peer connection.
    pub update: bool,
    /// Set by the resolver: the current track of that kind survives as-is.
    pub keep_audio: bool,
    pub keep_video: bool,
}

impl MediaConfig {
    /// Publisher default: send both kinds, receive nothing.
    pub fn send_only() -> Self {
        Self {
            audio_send: Some(true),
            video_send: Some(true),
            audio_recv: Some(false),
            video_recv: Some(false),
            ..Self::default()
        }
    }

    /// Subscriber default: receive both kinds, send nothing.
    pub fn recv_only() -> Self {
        Self {
            audio_send: Some(false),
            video_send: Some(false),
            audio_recv: Some(true),
            video_recv: Some(true),
            ..Self::default()
        }
    }

    pub fn send_enabled(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.audio != Some(false) && self.audio_send != Some(false),
            MediaKind::Video => self.video != Some(false) && self.video_send != Some(false),
        }
    }

    pub fn recv_enabled(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.audio != Some(false) && self.audio_recv != Some(false),
            MediaKind::Video => self.video != Some(false) && self.video_recv != Some(false),
        }
    }

    pub fn data_enabled(&self) -> bool {
        self.data == Some(true) || self.add_data
    }

    fn kept(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.keep_audio,
            MediaKind::Video => self.keep_video,
        }
    }
}

/// What the negotiation currently holds on the local side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalTracks {
    pub has_audio: bool,
    pub has_video: bool,
}

struct KindFlags<'a> {
    add: &'a mut bool,
    remove: &'a mut bool,
    replace: &'a mut bool,
    keep: &'a mut bool,
    send: &'a mut Option<bool>,
}

/// Folds the request against the current state. `update` is true when an
/// existing peer connection is being renegotiated; `tracks` is `None`
/// until a local stream exists.
pub fn normalize(
    config: &MediaConfig,
    update: bool,
    tracks: Option<LocalTracks>,
) -> Result<MediaConfig, ClientError> {
    let mut m = config.clone();
    m.update = update;
    if !update {
        m.keep_audio = false;
        m.keep_video = false;
        return Ok(m);
    }

    let send_audio = m.send_enabled(MediaKind::Audio);
    let send_video = m.send_enabled(MediaKind::Video);
    {
        let audio = KindFlags {
            add: &mut m.add_audio,
            remove: &mut m.remove_audio,
            replace: &mut m.replace_audio,
            keep: &mut m.keep_audio,
            send: &mut m.audio_send,
        };
        normalize_kind(MediaKind::Audio, audio, send_audio, tracks.map(|t| t.has_audio))?;
    }
    {
        let video = KindFlags {
            add: &mut m.add_video,
            remove: &mut m.remove_video,
            replace: &mut m.replace_video,
            keep: &mut m.keep_video,
            send: &mut m.video_send,
        };
        normalize_kind(MediaKind::Video, video, send_video, tracks.map(|t| t.has_video))?;
    }

    // Data channels can only be added.
    if m.add_data {
        m.data = Some(true);
    }
    Ok(m)
}

fn normalize_kind(
    kind: MediaKind,
    flags: KindFlags<'_>,
    send_enabled: bool,
    has_track: Option<bool>,
) -> Result<(), ClientError> {
    if *flags.add {
        *flags.keep = false;
        *flags.replace = false;
        *flags.remove = false;
        *flags.send = Some(true);
        if has_track == Some(true) {
            return Err(ClientError::TrackAlreadyPresent(kind));
        }
    } else if *flags.remove {
        *flags.keep = false;
        *flags.replace = false;
        *flags.add = false;
        *flags.send = Some(false);
        return Ok(());
    } else if *flags.replace {
        *flags.keep = false;
        *flags.add = false;
        *flags.remove = false;
        *flags.send = Some(true);
    }

    match has_track {
        Some(true) => {
            if send_enabled && !*flags.remove && !*flags.replace {
                *flags.keep = true;
            }
        }
        // No stream or no track of this kind: a replace is really an add,
        // and a plain send request means adding too.
        _ => {
            if *flags.replace {
                *flags.replace = false;
                *flags.add = true;
                *flags.send = Some(true);
            }
            if send_enabled {
                *flags.keep = false;
                *flags.add = true;
            }
        }
    }
    Ok(())
}

/// Capture is skipped entirely when an update keeps every sending track.
pub fn capture_needed(m: &MediaConfig) -> bool {
    let keeps_all = m.update
        && m.send_enabled(MediaKind::Audio)
        && m.kept(MediaKind::Audio)
        && m.send_enabled(MediaKind::Video)
        && m.kept(MediaKind::Video);
    !keeps_all && (m.send_enabled(MediaKind::Audio) || m.send_enabled(MediaKind::Video))
}
