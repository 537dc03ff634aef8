//! `RunTime`: the explicit, per-window state bundle that replaces the
//! original's global `_r`/`_options` singleton. Everything here
//! is created on connection, grows for the duration of one sampling window,
//! is read once by the emitters, and is dropped when the process exits —
//! there is no cross-window persistence.

use crate::name::NameCache;
use crate::recorder::TransitionRecorder;

#[derive(Default)]
pub struct RunTime {
    pub cache: NameCache,
    pub recorder: TransitionRecorder,
}

impl RunTime {
    pub fn new() -> Self {
        Self::default()
    }
}
