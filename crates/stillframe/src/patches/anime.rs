//! anime.js adapter.
//!
//! anime.js only fires `begin` when an update moves an instance off its
//! resting position. A direct seek from 0 to a positive time skips that
//! update, so the wrapped `seek` first nudges the instance by the smallest
//! positive time before seeking to the requested one. Timeline children are
//! created through the library's internal factory, so `add` and `reset` are
//! wrapped to patch them as they appear. Children are patched but not
//! tracked: their parent timeline seeks them.

use super::AnimationLibraryAdapter;

/// Adapter for the `anime` global
#[derive(Debug, Clone, Copy, Default)]
pub struct AnimeAdapter;

const PRELUDE: &str = r"
    var NUDGE = Number.MIN_VALUE;
    var timelineWrappers = new WeakMap();

    function patchChildren(instance) {
        (instance.children || []).forEach(function (child) {
            state.wrapInstance(adapter, child, false);
        });
    }

    function afterCall(instance, name) {
        var original = instance[name];
        if (typeof original !== 'function') { return; }
        instance[name] = function () {
            var result = original.apply(instance, arguments);
            patchChildren(instance);
            return result;
        };
    }

    function wrapTimelineFactory(original) {
        var cached = timelineWrappers.get(original);
        if (cached) { return cached; }
        var wrapped = function () {
            return state.wrapInstance(adapter, original.apply(this, arguments), true);
        };
        timelineWrappers.set(original, wrapped);
        return wrapped;
    }
";

const WRAP_FACTORY: &str = r"function (anime) {
        if (typeof anime !== 'function' || state.patched.has(anime)) { return anime; }
        var proxy = new Proxy(anime, {
            apply: function (target, thisArg, args) {
                return state.wrapInstance(adapter, Reflect.apply(target, thisArg, args), true);
            },
            get: function (target, prop, receiver) {
                var value = Reflect.get(target, prop, receiver);
                if (prop === 'timeline' && typeof value === 'function') {
                    return wrapTimelineFactory(value);
                }
                return value;
            }
        });
        state.patched.add(anime);
        state.patched.add(proxy);
        return proxy;
    }";

const WRAP_INSTANCE: &str = r"function (instance) {
        if (typeof instance.seek !== 'function') { return; }
        var originalSeek = instance.seek;
        instance.seek = function (time) {
            if (instance.currentTime === 0 && !instance.began && time > 0) {
                originalSeek.call(instance, NUDGE);
            }
            return originalSeek.call(instance, time);
        };
        afterCall(instance, 'add');
        afterCall(instance, 'reset');
        patchChildren(instance);
    }";

const SEEK: &str = r"function (instance, ms) {
        if (typeof instance.pause === 'function') { instance.pause(); }
        instance.seek(ms);
    }";

impl AnimationLibraryAdapter for AnimeAdapter {
    fn name(&self) -> &'static str {
        "animejs"
    }

    fn global(&self) -> &'static str {
        "anime"
    }

    fn detect_js(&self) -> &'static str {
        "typeof window.anime === 'function'"
    }

    fn prelude_js(&self) -> &'static str {
        PRELUDE
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
