//! Grace-period violation detector.
//!
//! A single pure transition function drives the detector:
//! `(detector, event, context) -> (detector, effects)`. It never touches a
//! clock, a timer or the network. The session runtime feeds it environment
//! signals and grace-timer expirations, then carries out the returned effects.
//!
//! ## States
//!
//! - `Safe`: no pending violation
//! - `GracePending(type, deadline)`: the candidate left the safe state and has
//!   until `deadline` to come back
//!
//! ## Key transitions
//!
//! - fullscreen exit / tab hidden / window blur: `Safe -> GracePending`
//! - fullscreen AND visible observed together: `GracePending -> Safe` (no penalty)
//! - deadline elapsed: `GracePending -> Safe` with one life lost
//!
//! Fullscreen exit, tab hide and blur usually arrive together for one
//! alt-tab, so they share one grace period: while one is pending, further
//! triggers are ignored and the first violation type is kept.

use tokio::time::{Duration, Instant};

use crate::models::{Directive, EnvSignal, ViolationType};

pub const FULLSCREEN_WARNING: &str =
    "Please return to fullscreen within 10 seconds or a life will be eliminated.";
pub const TAB_SWITCH_WARNING: &str =
    "Please return to the exam tab within 10 seconds or a life will be eliminated.";
pub const BLUR_WARNING: &str = "Please keep the exam window focused.";
pub const FULLSCREEN_REQUIRED: &str = "Please enable fullscreen mode to continue the exam";
pub const UNLOAD_PROMPT: &str = "You have an exam in progress. Are you sure you want to leave?";

const COPY_BLOCKED: &str = "Copying is disabled during the exam";
const PASTE_BLOCKED: &str = "Pasting is disabled during the exam";
const RIGHT_CLICK_BLOCKED: &str = "Right-click is disabled during the exam";
const SHORTCUT_BLOCKED: &str = "Keyboard shortcuts are disabled during the exam";
const REFRESH_BLOCKED: &str = "Page refresh is disabled during the exam";
const BACK_BLOCKED: &str = "Back navigation is disabled during the exam";

/// Last observed browser environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Environment {
    pub fullscreen: bool,
    pub visible: bool,
    pub focused: bool,
}

impl Environment {
    /// Assumed at arm time: fullscreen has been requested and the tab is in front.
    pub fn nominal() -> Self {
        Self {
            fullscreen: true,
            visible: true,
            focused: true,
        }
    }

    /// Strict recovery: focus alone never cancels a pending grace period.
    pub fn is_recovered(&self) -> bool {
        self.fullscreen && self.visible
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    Safe,
    GracePending {
        violation: ViolationType,
        deadline: Instant,
        generation: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorEvent {
    Arm { env: Environment },
    Disarm,
    Signal(EnvSignal),
    GraceElapsed { generation: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Recovered,
    Disarmed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorEffect {
    StartGraceTimer { deadline: Instant, generation: u64 },
    CancelGraceTimer { reason: CancelReason },
    LoseLife(ViolationType),
    AutoSubmit,
    Directive(Directive),
}

/// Inputs the detector reads but does not own.
#[derive(Debug, Clone, Copy)]
pub struct DetectorContext {
    pub now: Instant,
    pub lives_remaining: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViolationDetector {
    state: DetectorState,
    env: Environment,
    armed: bool,
    generation: u64,
    grace_period: Duration,
}

impl ViolationDetector {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            state: DetectorState::Safe,
            env: Environment::nominal(),
            armed: false,
            generation: 0,
            grace_period,
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn environment(&self) -> Environment {
        self.env
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn pending_violation(&self) -> Option<ViolationType> {
        match self.state {
            DetectorState::GracePending { violation, .. } => Some(violation),
            DetectorState::Safe => None,
        }
    }

    pub fn transition(
        self,
        event: DetectorEvent,
        ctx: DetectorContext,
    ) -> (Self, Vec<DetectorEffect>) {
        let mut next = self;
        let mut effects = Vec::new();

        match event {
            DetectorEvent::Arm { env } => {
                if !next.armed {
                    next.armed = true;
                    next.env = env;
                    next.state = DetectorState::Safe;
                    effects.push(DetectorEffect::Directive(Directive::PushHistoryState));
                    if !env.fullscreen && ctx.lives_remaining > 0 {
                        next.open_grace(ViolationType::FullscreenExit, ctx, &mut effects);
                    }
                }
            }
            DetectorEvent::Disarm => {
                if next.armed {
                    next.armed = false;
                    if next.pending_violation().is_some() {
                        effects.push(DetectorEffect::CancelGraceTimer {
                            reason: CancelReason::Disarmed,
                        });
                        effects.push(DetectorEffect::Directive(Directive::ClearWarning));
                    }
                    next.state = DetectorState::Safe;
                }
            }
            // Nothing reaches a disarmed detector: late timers and stray
            // listener callbacks after teardown are dropped here.
            _ if !next.armed => {}
            DetectorEvent::Signal(signal) => next.on_signal(signal, ctx, &mut effects),
            DetectorEvent::GraceElapsed { generation } => {
                next.on_grace_elapsed(generation, ctx, &mut effects)
            }
        }

        (next, effects)
    }

    fn on_signal(&mut self, signal: EnvSignal, ctx: DetectorContext, effects: &mut Vec<DetectorEffect>) {
        let has_lives = ctx.lives_remaining > 0;

        match signal {
            EnvSignal::FullscreenChange { active } => {
                self.env.fullscreen = active;
                if !active && has_lives {
                    self.open_grace(ViolationType::FullscreenExit, ctx, effects);
                } else if active {
                    self.try_recover(effects);
                }
            }
            EnvSignal::FullscreenDenied => {
                self.env.fullscreen = false;
                effects.push(DetectorEffect::Directive(Directive::notify(FULLSCREEN_REQUIRED)));
                if has_lives {
                    self.open_grace(ViolationType::FullscreenExit, ctx, effects);
                }
            }
            EnvSignal::VisibilityChange { hidden } => {
                self.env.visible = !hidden;
                if hidden && has_lives {
                    self.open_grace(ViolationType::TabSwitch, ctx, effects);
                } else if !hidden {
                    self.try_recover(effects);
                }
            }
            EnvSignal::WindowBlur => {
                self.env.focused = false;
                // hidden tab or lost fullscreen already account for this action
                if has_lives && self.env.visible && self.env.fullscreen {
                    self.open_grace(ViolationType::WindowBlur, ctx, effects);
                }
            }
            EnvSignal::WindowFocus => {
                self.env.focused = true;
                self.try_recover(effects);
            }
            EnvSignal::Copy => {
                effects.push(DetectorEffect::Directive(Directive::PreventDefault));
                if has_lives {
                    effects.push(DetectorEffect::LoseLife(ViolationType::Copy));
                }
                effects.push(DetectorEffect::Directive(Directive::notify(COPY_BLOCKED)));
            }
            EnvSignal::Paste => {
                effects.push(DetectorEffect::Directive(Directive::PreventDefault));
                if has_lives {
                    effects.push(DetectorEffect::LoseLife(ViolationType::Paste));
                }
                effects.push(DetectorEffect::Directive(Directive::notify(PASTE_BLOCKED)));
            }
            EnvSignal::ContextMenu => {
                effects.push(DetectorEffect::Directive(Directive::PreventDefault));
                effects.push(DetectorEffect::Directive(Directive::notify(RIGHT_CLICK_BLOCKED)));
            }
            EnvSignal::KeyDown { key, ctrl, meta } => {
                if let Some(message) = blocked_shortcut(&key, ctrl || meta) {
                    effects.push(DetectorEffect::Directive(Directive::PreventDefault));
                    effects.push(DetectorEffect::Directive(Directive::notify(message)));
                }
            }
            EnvSignal::PopState => {
                effects.push(DetectorEffect::Directive(Directive::PreventDefault));
                effects.push(DetectorEffect::Directive(Directive::PushHistoryState));
                effects.push(DetectorEffect::Directive(Directive::notify(BACK_BLOCKED)));
            }
            EnvSignal::BeforeUnload => {
                effects.push(DetectorEffect::Directive(Directive::PreventDefault));
                effects.push(DetectorEffect::Directive(Directive::ConfirmUnload {
                    message: UNLOAD_PROMPT.to_string(),
                }));
            }
        }
    }

    fn on_grace_elapsed(
        &mut self,
        generation: u64,
        ctx: DetectorContext,
        effects: &mut Vec<DetectorEffect>,
    ) {
        let DetectorState::GracePending {
            violation,
            generation: pending,
            ..
        } = self.state
        else {
            return;
        };
        if pending != generation {
            return;
        }

        self.state = DetectorState::Safe;
        effects.push(DetectorEffect::Directive(Directive::ClearWarning));

        if ctx.lives_remaining == 0 {
            return;
        }
        effects.push(DetectorEffect::LoseLife(violation));
        if ctx.lives_remaining - 1 > 0 {
            // best effort: the browser may refuse without a user gesture
            effects.push(DetectorEffect::Directive(Directive::RequestFullscreen));
        } else {
            effects.push(DetectorEffect::AutoSubmit);
        }
    }

    fn open_grace(
        &mut self,
        violation: ViolationType,
        ctx: DetectorContext,
        effects: &mut Vec<DetectorEffect>,
    ) {
        if self.pending_violation().is_some() {
            return;
        }
        self.generation += 1;
        let deadline = ctx.now + self.grace_period;
        self.state = DetectorState::GracePending {
            violation,
            deadline,
            generation: self.generation,
        };
        effects.push(DetectorEffect::StartGraceTimer {
            deadline,
            generation: self.generation,
        });
        effects.push(DetectorEffect::Directive(Directive::ShowWarning {
            message: warning_for(violation).to_string(),
            grace_seconds: self.grace_period.as_secs(),
        }));
    }

    fn try_recover(&mut self, effects: &mut Vec<DetectorEffect>) {
        if self.pending_violation().is_some() && self.env.is_recovered() {
            self.state = DetectorState::Safe;
            effects.push(DetectorEffect::CancelGraceTimer {
                reason: CancelReason::Recovered,
            });
            effects.push(DetectorEffect::Directive(Directive::ClearWarning));
        }
    }
}

fn warning_for(violation: ViolationType) -> &'static str {
    match violation {
        ViolationType::TabSwitch => TAB_SWITCH_WARNING,
        ViolationType::WindowBlur => BLUR_WARNING,
        ViolationType::FullscreenExit | ViolationType::Copy | ViolationType::Paste => {
            FULLSCREEN_WARNING
        }
    }
}

fn blocked_shortcut(key: &str, modifier: bool) -> Option<&'static str> {
    let key = key.to_ascii_lowercase();
    if modifier && matches!(key.as_str(), "c" | "v" | "x") {
        return Some(SHORTCUT_BLOCKED);
    }
    if key == "f5" || (modifier && key == "r") {
        return Some(REFRESH_BLOCKED);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRACE: Duration = Duration::from_secs(10);

    struct Harness {
        detector: ViolationDetector,
        now: Instant,
        lives: u8,
    }

    impl Harness {
        fn armed() -> Self {
            let mut harness = Self {
                detector: ViolationDetector::new(GRACE),
                now: Instant::now(),
                lives: 3,
            };
            harness.send(DetectorEvent::Arm {
                env: Environment::nominal(),
            });
            harness
        }

        fn send(&mut self, event: DetectorEvent) -> Vec<DetectorEffect> {
            let ctx = DetectorContext {
                now: self.now,
                lives_remaining: self.lives,
            };
            let (next, effects) = self.detector.transition(event, ctx);
            self.detector = next;
            let lost = effects
                .iter()
                .filter(|e| matches!(e, DetectorEffect::LoseLife(_)))
                .count() as u8;
            self.lives = self.lives.saturating_sub(lost);
            effects
        }

        fn signal(&mut self, signal: EnvSignal) -> Vec<DetectorEffect> {
            self.send(DetectorEvent::Signal(signal))
        }

        fn pending_generation(&self) -> u64 {
            match self.detector.state() {
                DetectorState::GracePending { generation, .. } => generation,
                DetectorState::Safe => panic!("no grace period pending"),
            }
        }

        fn elapse(&mut self) -> Vec<DetectorEffect> {
            let generation = self.pending_generation();
            self.now += GRACE;
            self.send(DetectorEvent::GraceElapsed { generation })
        }
    }

    fn lost(effects: &[DetectorEffect]) -> Vec<ViolationType> {
        effects
            .iter()
            .filter_map(|e| match e {
                DetectorEffect::LoseLife(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    fn alt_tab(h: &mut Harness) {
        h.signal(EnvSignal::WindowBlur);
        h.signal(EnvSignal::VisibilityChange { hidden: true });
        h.signal(EnvSignal::FullscreenChange { active: false });
    }

    #[test]
    fn arm_pushes_history_guard() {
        let mut detector = ViolationDetector::new(GRACE);
        let (next, effects) = detector.transition(
            DetectorEvent::Arm {
                env: Environment::nominal(),
            },
            DetectorContext {
                now: Instant::now(),
                lives_remaining: 3,
            },
        );
        detector = next;
        assert!(detector.is_armed());
        assert_eq!(
            effects,
            vec![DetectorEffect::Directive(Directive::PushHistoryState)]
        );
    }

    #[test]
    fn fullscreen_exit_opens_grace_period() {
        let mut h = Harness::armed();
        let effects = h.signal(EnvSignal::FullscreenChange { active: false });

        assert_eq!(
            h.detector.pending_violation(),
            Some(ViolationType::FullscreenExit)
        );
        assert!(effects.iter().any(|e| matches!(
            e,
            DetectorEffect::StartGraceTimer { deadline, .. } if *deadline == h.now + GRACE
        )));
        assert!(effects.contains(&DetectorEffect::Directive(Directive::ShowWarning {
            message: FULLSCREEN_WARNING.to_string(),
            grace_seconds: 10,
        })));
    }

    #[test]
    fn one_alt_tab_costs_at_most_one_life() {
        let mut h = Harness::armed();
        alt_tab(&mut h);

        // blur fired first while everything else was nominal, so it wins
        assert_eq!(h.detector.pending_violation(), Some(ViolationType::WindowBlur));

        let effects = h.elapse();
        assert_eq!(lost(&effects), vec![ViolationType::WindowBlur]);
        assert_eq!(h.lives, 2);
        assert_eq!(h.detector.state(), DetectorState::Safe);
    }

    #[test]
    fn retrigger_does_not_extend_deadline() {
        let mut h = Harness::armed();
        h.signal(EnvSignal::FullscreenChange { active: false });
        let first = h.detector.state();

        h.now += Duration::from_secs(4);
        let effects = h.signal(EnvSignal::VisibilityChange { hidden: true });
        assert!(effects.is_empty());
        assert_eq!(h.detector.state(), first);
    }

    #[test]
    fn recovery_requires_fullscreen_and_visibility() {
        let mut h = Harness::armed();
        h.signal(EnvSignal::VisibilityChange { hidden: true });
        h.signal(EnvSignal::FullscreenChange { active: false });

        h.signal(EnvSignal::VisibilityChange { hidden: false });
        assert!(h.detector.pending_violation().is_some());
        h.signal(EnvSignal::WindowFocus);
        assert!(h.detector.pending_violation().is_some());

        let effects = h.signal(EnvSignal::FullscreenChange { active: true });
        assert!(effects.contains(&DetectorEffect::CancelGraceTimer {
            reason: CancelReason::Recovered
        }));
        assert_eq!(h.detector.state(), DetectorState::Safe);
        assert_eq!(h.lives, 3);
    }

    #[test]
    fn focus_alone_never_cancels_blur_grace() {
        let mut h = Harness::armed();
        h.signal(EnvSignal::WindowBlur);
        h.signal(EnvSignal::FullscreenChange { active: false });
        h.signal(EnvSignal::WindowFocus);

        assert_eq!(h.detector.pending_violation(), Some(ViolationType::WindowBlur));
        assert_eq!(lost(&h.elapse()), vec![ViolationType::WindowBlur]);
    }

    #[test]
    fn stale_grace_timer_is_ignored() {
        let mut h = Harness::armed();
        h.signal(EnvSignal::FullscreenChange { active: false });
        let stale = h.pending_generation();
        h.signal(EnvSignal::FullscreenChange { active: true });

        h.signal(EnvSignal::VisibilityChange { hidden: true });
        let effects = h.send(DetectorEvent::GraceElapsed { generation: stale });
        assert!(effects.is_empty());
        assert_eq!(h.detector.pending_violation(), Some(ViolationType::TabSwitch));
    }

    #[test]
    fn detector_rearms_after_penalty() {
        let mut h = Harness::armed();
        h.signal(EnvSignal::VisibilityChange { hidden: true });
        let effects = h.elapse();
        assert!(effects.contains(&DetectorEffect::Directive(Directive::RequestFullscreen)));

        h.signal(EnvSignal::VisibilityChange { hidden: false });
        h.signal(EnvSignal::VisibilityChange { hidden: true });
        assert_eq!(h.detector.pending_violation(), Some(ViolationType::TabSwitch));
    }

    #[test]
    fn last_life_triggers_auto_submit() {
        let mut h = Harness::armed();
        h.lives = 1;
        h.signal(EnvSignal::FullscreenChange { active: false });
        let effects = h.elapse();

        assert_eq!(lost(&effects), vec![ViolationType::FullscreenExit]);
        assert!(effects.contains(&DetectorEffect::AutoSubmit));
        assert!(!effects.contains(&DetectorEffect::Directive(Directive::RequestFullscreen)));
    }

    #[test]
    fn clipboard_is_penalized_immediately() {
        let mut h = Harness::armed();
        let effects = h.signal(EnvSignal::Copy);
        assert_eq!(lost(&effects), vec![ViolationType::Copy]);
        assert_eq!(effects[0], DetectorEffect::Directive(Directive::PreventDefault));
        assert_eq!(h.detector.state(), DetectorState::Safe);

        let effects = h.signal(EnvSignal::Paste);
        assert_eq!(lost(&effects), vec![ViolationType::Paste]);
        assert_eq!(h.lives, 1);
    }

    #[test]
    fn deterrents_never_cost_lives() {
        let mut h = Harness::armed();
        let signals = vec![
            EnvSignal::ContextMenu,
            EnvSignal::KeyDown {
                key: "V".to_string(),
                ctrl: true,
                meta: false,
            },
            EnvSignal::KeyDown {
                key: "F5".to_string(),
                ctrl: false,
                meta: false,
            },
            EnvSignal::KeyDown {
                key: "r".to_string(),
                ctrl: false,
                meta: true,
            },
            EnvSignal::PopState,
            EnvSignal::BeforeUnload,
        ];

        for signal in signals {
            let effects = h.signal(signal);
            assert!(effects.contains(&DetectorEffect::Directive(Directive::PreventDefault)));
            assert!(lost(&effects).is_empty());
        }
        assert_eq!(h.lives, 3);
    }

    #[test]
    fn plain_keys_pass_through() {
        let mut h = Harness::armed();
        let effects = h.signal(EnvSignal::KeyDown {
            key: "c".to_string(),
            ctrl: false,
            meta: false,
        });
        assert!(effects.is_empty());
    }

    #[test]
    fn disarm_cancels_pending_and_ignores_late_timer() {
        let mut h = Harness::armed();
        h.signal(EnvSignal::FullscreenChange { active: false });
        let generation = h.pending_generation();

        let effects = h.send(DetectorEvent::Disarm);
        assert!(effects.contains(&DetectorEffect::CancelGraceTimer {
            reason: CancelReason::Disarmed
        }));

        let effects = h.send(DetectorEvent::GraceElapsed { generation });
        assert!(effects.is_empty());
        assert!(h.signal(EnvSignal::Copy).is_empty());
        assert_eq!(h.lives, 3);
    }

    #[test]
    fn fullscreen_denied_gives_one_grace_window() {
        let mut h = Harness::armed();
        let effects = h.signal(EnvSignal::FullscreenDenied);
        assert!(effects.contains(&DetectorEffect::Directive(Directive::notify(
            FULLSCREEN_REQUIRED
        ))));
        assert_eq!(
            h.detector.pending_violation(),
            Some(ViolationType::FullscreenExit)
        );
    }

    #[test]
    fn arming_outside_fullscreen_starts_grace() {
        let mut detector = ViolationDetector::new(GRACE);
        let env = Environment {
            fullscreen: false,
            ..Environment::nominal()
        };
        let (next, effects) = detector.transition(
            DetectorEvent::Arm { env },
            DetectorContext {
                now: Instant::now(),
                lives_remaining: 3,
            },
        );
        detector = next;
        assert_eq!(
            detector.pending_violation(),
            Some(ViolationType::FullscreenExit)
        );
        assert!(effects
            .iter()
            .any(|e| matches!(e, DetectorEffect::StartGraceTimer { .. })));
    }

    #[test]
    fn no_lives_means_no_new_grace() {
        let mut h = Harness::armed();
        h.lives = 0;
        let effects = h.signal(EnvSignal::VisibilityChange { hidden: true });
        assert!(effects.is_empty());
        assert!(lost(&h.signal(EnvSignal::Copy)).is_empty());
    }
}
