//! GSAP adapter.
//!
//! Every GSAP tween lives on `gsap.globalTimeline`, so tracking that one
//! timeline is enough. GSAP fires start callbacks on jumps by itself, so the
//! instance wrapper is empty; the factory wrapper disables lag smoothing so
//! the ticker never rewrites elapsed time after a long virtual-time budget.
//! Seeks take seconds.

use super::AnimationLibraryAdapter;

/// Adapter for the `gsap` global
#[derive(Debug, Clone, Copy, Default)]
pub struct GsapAdapter;

const WRAP_FACTORY: &str = r"function (gsap) {
        if (gsap && typeof gsap === 'object' && gsap.globalTimeline) {
            state.wrapInstance(adapter, gsap.globalTimeline, true);
            if (gsap.ticker && typeof gsap.ticker.lagSmoothing === 'function') {
                gsap.ticker.lagSmoothing(0);
            }
        }
        return gsap;
    }";

const WRAP_INSTANCE: &str = r"function (timeline) {}";

const SEEK: &str = r"function (timeline, ms) {
        timeline.pause();
        timeline.seek(ms / 1000, false);
    }";

impl AnimationLibraryAdapter for GsapAdapter {
    fn name(&self) -> &'static str {
        "gsap"
    }

    fn global(&self) -> &'static str {
        "gsap"
    }

    fn detect_js(&self) -> &'static str {
        "!!(window.gsap && window.gsap.globalTimeline)"
    }

    fn wrap_factory_js(&self) -> &'static str {
        WRAP_FACTORY
    }

    fn wrap_instance_js(&self) -> &'static str {
        WRAP_INSTANCE
    }

    fn seek_js(&self) -> &'static str {
        SEEK
    }
}
