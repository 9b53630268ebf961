//! Camera session bring-up and teardown.
//!
//! Readiness signals (permissions, vision library, camera device, capture
//! size, preview surface, capture session) arrive from independent hardware
//! callbacks in no fixed order. `InitSequencer` records each as a monotonic
//! stage flag and consults a fixed rule table: a rule's entry actions fire
//! exactly once, at the moment the last of its required stages is reached.
//!
//! `LifecycleDriver` is the message-passing boundary around the sequencer:
//! collaborators send `LifecycleEvent`s over a channel and the driver runs the
//! resulting `SessionAction`s against a `CameraHost`.

use anyhow::Result;
use crossbeam_channel::Receiver;

use crate::frame::CaptureSize;

/// Readiness stages. Each is set at most once per session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    PermissionsGranted,
    VisionLibraryLoaded,
    CameraOpened,
    CaptureSizeCalculated,
    ViewsInitialized,
    CaptureInitialized,
    CaptureStarted,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::PermissionsGranted,
        Stage::VisionLibraryLoaded,
        Stage::CameraOpened,
        Stage::CaptureSizeCalculated,
        Stage::ViewsInitialized,
        Stage::CaptureInitialized,
        Stage::CaptureStarted,
    ];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Set of reached stages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageSet(u8);

impl StageSet {
    pub fn contains(&self, stage: Stage) -> bool {
        self.0 & stage.bit() != 0
    }

    pub fn contains_all(&self, stages: &[Stage]) -> bool {
        stages.iter().all(|s| self.contains(*s))
    }

    fn insert(&mut self, stage: Stage) -> bool {
        let fresh = !self.contains(stage);
        self.0 |= stage.bit();
        fresh
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Stage> + '_ {
        Stage::ALL.into_iter().filter(|s| self.contains(*s))
    }
}

/// Work the sequencer asks the camera collaborator to perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionAction {
    LoadVisionLibrary,
    CalculateCaptureSize,
    OpenCamera,
    InitializeViews,
    InitializeCapture,
    StartCapture,
    StopCapture,
    CloseCaptureSession,
    ReleaseViews,
    CloseCamera,
}

struct Rule {
    requires: &'static [Stage],
    actions: &'static [SessionAction],
    /// Undoes the rule's actions on teardown once they were issued, whether
    /// or not their completion was reported.
    undo: Option<SessionAction>,
}

const RULES: [Rule; 4] = [
    Rule {
        requires: &[Stage::PermissionsGranted],
        actions: &[
            SessionAction::LoadVisionLibrary,
            SessionAction::CalculateCaptureSize,
            SessionAction::OpenCamera,
        ],
        undo: Some(SessionAction::CloseCamera),
    },
    Rule {
        requires: &[Stage::CameraOpened, Stage::CaptureSizeCalculated],
        actions: &[SessionAction::InitializeViews],
        undo: Some(SessionAction::ReleaseViews),
    },
    Rule {
        requires: &[
            Stage::VisionLibraryLoaded,
            Stage::CameraOpened,
            Stage::ViewsInitialized,
        ],
        actions: &[SessionAction::InitializeCapture],
        undo: Some(SessionAction::CloseCaptureSession),
    },
    Rule {
        requires: &[Stage::CaptureInitialized],
        actions: &[SessionAction::StartCapture],
        undo: Some(SessionAction::StopCapture),
    },
];

/// Dependency-ordered session state machine.
#[derive(Debug, Default)]
pub struct InitSequencer {
    reached: StageSet,
    fired: u8,
    permissions_cached: bool,
}

impl InitSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reached(&self) -> StageSet {
        self.reached
    }

    pub fn is_reached(&self, stage: Stage) -> bool {
        self.reached.contains(stage)
    }

    /// Record a stage. Returns the entry actions that became due; marking a
    /// stage that is already set returns nothing.
    pub fn mark(&mut self, stage: Stage) -> Vec<SessionAction> {
        if !self.reached.insert(stage) {
            log::debug!("lifecycle: {:?} already set", stage);
            return Vec::new();
        }
        log::info!("lifecycle: {:?}", stage);
        if stage == Stage::PermissionsGranted {
            self.permissions_cached = true;
        }

        let mut due = Vec::new();
        for (index, rule) in RULES.iter().enumerate() {
            let bit = 1u8 << index;
            if self.fired & bit != 0
                || !rule.requires.contains(&stage)
                || !self.reached.contains_all(rule.requires)
            {
                continue;
            }
            self.fired |= bit;
            due.extend_from_slice(rule.actions);
        }
        due
    }

    /// Clear every stage and return the undo actions for whatever was
    /// brought up, most recent first. Cached permissions survive.
    pub fn teardown(&mut self) -> Vec<SessionAction> {
        let undo = RULES
            .iter()
            .enumerate()
            .rev()
            .filter(|(index, _)| self.fired & (1u8 << index) != 0)
            .filter_map(|(_, rule)| rule.undo)
            .collect();
        if !self.reached.is_empty() {
            log::info!("lifecycle: teardown");
        }
        self.reached = StageSet::default();
        self.fired = 0;
        undo
    }

    /// Re-enter the chain after a teardown using cached permissions.
    pub fn resume(&mut self) -> Vec<SessionAction> {
        if self.permissions_cached {
            self.mark(Stage::PermissionsGranted)
        } else {
            Vec::new()
        }
    }
}

// ----------------------------------------------------------------------------
// Driver
// ----------------------------------------------------------------------------

/// Signals from hardware and platform collaborators.
#[derive(Clone, Debug, PartialEq)]
pub enum LifecycleEvent {
    PermissionsGranted,
    VisionLibraryLoaded,
    CameraOpened,
    CaptureSizeCalculated(CaptureSize),
    SurfaceReady,
    CaptureSessionConfigured,
    CaptureStarted,
    /// Camera open or session configuration failed.
    SessionFailed(String),
    Disconnected,
    Resume,
    Shutdown,
}

impl LifecycleEvent {
    /// The stage this event reports as reached, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::PermissionsGranted => Some(Stage::PermissionsGranted),
            Self::VisionLibraryLoaded => Some(Stage::VisionLibraryLoaded),
            Self::CameraOpened => Some(Stage::CameraOpened),
            Self::CaptureSizeCalculated(_) => Some(Stage::CaptureSizeCalculated),
            Self::SurfaceReady => Some(Stage::ViewsInitialized),
            Self::CaptureSessionConfigured => Some(Stage::CaptureInitialized),
            Self::CaptureStarted => Some(Stage::CaptureStarted),
            Self::SessionFailed(_) | Self::Disconnected | Self::Resume | Self::Shutdown => None,
        }
    }
}

/// Facts about the current session the host needs to act on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionInfo {
    pub capture_size: Option<CaptureSize>,
}

/// Camera collaborator. Actions start work; completion is reported back as a
/// `LifecycleEvent` on the driver's channel.
pub trait CameraHost {
    fn perform(&mut self, action: SessionAction, session: &SessionInfo) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct LifecycleDriver<H: CameraHost> {
    sequencer: InitSequencer,
    session: SessionInfo,
    host: H,
}

impl<H: CameraHost> LifecycleDriver<H> {
    pub fn new(host: H) -> Self {
        Self {
            sequencer: InitSequencer::new(),
            session: SessionInfo::default(),
            host,
        }
    }

    pub fn sequencer(&self) -> &InitSequencer {
        &self.sequencer
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Apply one event. Stage completions that arrive outside a session
    /// (before permissions, or left over from a torn-down session) are dropped.
    pub fn handle(&mut self, event: LifecycleEvent) -> Flow {
        if let Some(stage) = event.stage() {
            if stage != Stage::PermissionsGranted
                && !self.sequencer.is_reached(Stage::PermissionsGranted)
            {
                log::debug!("lifecycle: ignoring {:?} outside a session", event);
                return Flow::Continue;
            }
        }
        let due = match event {
            LifecycleEvent::CaptureSizeCalculated(size) => {
                if self.sequencer.is_reached(Stage::CaptureSizeCalculated) {
                    Vec::new()
                } else {
                    log::info!("capture size negotiated: {}", size);
                    self.session.capture_size = Some(size);
                    self.sequencer.mark(Stage::CaptureSizeCalculated)
                }
            }
            LifecycleEvent::SessionFailed(reason) => {
                log::error!("camera session failed: {}", reason);
                self.teardown();
                return Flow::Continue;
            }
            LifecycleEvent::Disconnected => {
                log::warn!("camera disconnected");
                self.teardown();
                return Flow::Continue;
            }
            LifecycleEvent::Resume => self.sequencer.resume(),
            LifecycleEvent::Shutdown => {
                self.teardown();
                return Flow::Exit;
            }
            other => match other.stage() {
                Some(stage) => self.sequencer.mark(stage),
                None => Vec::new(),
            },
        };
        self.run_actions(due);
        Flow::Continue
    }

    /// Process events until `Shutdown` or until every sender is gone.
    pub fn run(mut self, events: Receiver<LifecycleEvent>) -> H {
        for event in events.iter() {
            if self.handle(event) == Flow::Exit {
                return self.host;
            }
        }
        self.teardown();
        self.host
    }

    fn run_actions(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            log::debug!("lifecycle action: {:?}", action);
            if let Err(err) = self.host.perform(action, &self.session) {
                log::error!("lifecycle action {:?} failed: {}", action, err);
                self.teardown();
                return;
            }
        }
    }

    fn teardown(&mut self) {
        for action in self.sequencer.teardown() {
            if let Err(err) = self.host.perform(action, &self.session) {
                log::warn!("teardown action {:?} failed: {}", action, err);
            }
        }
        self.session = SessionInfo::default();
    }
}
