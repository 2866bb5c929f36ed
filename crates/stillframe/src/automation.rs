//! Frame-callback instrumentation and per-context automation state.
//!
//! Virtual time does not drive `requestAnimationFrame`, so the page's frame
//! scheduling primitive is intercepted before any page script runs. The
//! runtime installed here:
//!
//! - counts real frame ticks (read by the bootstrap waiter),
//! - keeps every pending frame callback so it can be force-run with a chosen
//!   timestamp,
//! - optionally pins `performance.now()` to the capture timestamp,
//! - holds the identity-keyed registry of patched library instances used by
//!   the adapters in [`crate::patches`].
//!
//! All of it lives under a namespace key unique to the [`AutomationState`]
//! that generated it, so nothing leaks between contexts.

use crate::driver::CaptureDriver;
use crate::result::{CaptureError, CaptureResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

const NAMESPACE_TOKEN: &str = "__NS__";

/// Page-side runtime; `__NS__` is replaced with the session namespace
const RUNTIME_JS: &str = r#"
(function () {
    'use strict';
    var NS = '__NS__';
    if (window[NS]) { return; }

    var nativeRaf = window.requestAnimationFrame.bind(window);
    var nativeNow = performance.now.bind(performance);

    var state = {
        ticks: 0,
        lastFrame: -1,
        nextHandle: 1,
        pending: new Map(),
        patched: new WeakSet(),
        instances: [],
        adapters: {},
        timeOverride: null,
        errors: []
    };

    function message(err) {
        return String(err && err.message ? err.message : err);
    }

    state.noteError = function (where, err) {
        if (state.errors.length < 100) { state.errors.push(where + ': ' + message(err)); }
    };

    function countTick(ts) {
        if (ts !== state.lastFrame) {
            state.lastFrame = ts;
            state.ticks += 1;
        }
    }

    // Pages that never call requestAnimationFrame still tick during bootstrap
    state.heartbeat = true;
    function beat(ts) {
        countTick(ts);
        if (state.heartbeat) { nativeRaf(beat); }
    }
    nativeRaf(beat);

    state.stopHeartbeat = function () {
        state.heartbeat = false;
        return state.ticks;
    };

    window.requestAnimationFrame = function (callback) {
        var handle = state.nextHandle++;
        state.pending.set(handle, callback);
        nativeRaf(function (ts) {
            countTick(ts);
            var cb = state.pending.get(handle);
            if (!cb) { return; }
            state.pending.delete(handle);
            cb(state.timeOverride === null ? ts : state.timeOverride);
        });
        return handle;
    };

    window.cancelAnimationFrame = function (handle) {
        state.pending.delete(handle);
    };

    performance.now = function () {
        return state.timeOverride === null ? nativeNow() : state.timeOverride;
    };

    state.readTicks = function () { return state.ticks; };

    state.setTime = function (ms) {
        state.timeOverride = ms;
        return true;
    };

    state.syncDeclarative = function (ms) {
        var report = { total: 0, synced: 0, failed: [] };
        var list = typeof document.getAnimations === 'function' ? document.getAnimations() : [];
        list.forEach(function (anim, index) {
            report.total += 1;
            try {
                anim.pause();
                anim.currentTime = ms;
                report.synced += 1;
            } catch (err) {
                report.failed.push('animation #' + index + ': ' + message(err));
            }
        });
        return report;
    };

    state.syncLibraries = function (ms) {
        var report = { total: 0, synced: 0, failed: [] };
        state.instances.forEach(function (entry, index) {
            report.total += 1;
            try {
                entry.adapter.seek(entry.instance, ms);
                report.synced += 1;
            } catch (err) {
                report.failed.push(entry.adapter.name + ' #' + index + ': ' + message(err));
            }
        });
        return report;
    };

    state.flushFrames = function (ms, maxIterations) {
        var report = { ran: 0, iterations: 0, pending: 0, truncated: false, failed: [] };
        while (state.pending.size > 0 && report.iterations < maxIterations) {
            var batch = Array.from(state.pending.values());
            state.pending.clear();
            report.iterations += 1;
            batch.forEach(function (cb) {
                try {
                    cb(ms);
                    report.ran += 1;
                } catch (err) {
                    report.failed.push(message(err));
                }
            });
        }
        report.pending = state.pending.size;
        report.truncated = report.pending > 0;
        return report;
    };

    function sourcesOf(el) {
        var list = [];
        if (el.getAttribute('src')) { list.push(el.getAttribute('src')); }
        Array.prototype.forEach.call(el.querySelectorAll('source'), function (s) {
            if (s.getAttribute('src')) { list.push(s.getAttribute('src')); }
        });
        return list;
    }

    state.seekMedia = function (ms) {
        var out = [];
        var els = document.querySelectorAll('video, audio');
        Array.prototype.forEach.call(els, function (el, index) {
            var entry = {
                index: index,
                tag: el.tagName,
                sources: sourcesOf(el),
                errorCode: el.error ? el.error.code : null,
                unsupported: false,
                target: null,
                failed: null
            };
            try {
                if (el.error || el.networkState === HTMLMediaElement.NETWORK_NO_SOURCE) {
                    entry.unsupported = true;
                } else {
                    var target = ms / 1000;
                    if (isFinite(el.duration)) { target = Math.min(target, el.duration); }
                    if (el.buffered && el.buffered.length > 0) {
                        target = Math.min(target, el.buffered.end(el.buffered.length - 1));
                    }
                    target = Math.max(0, target);
                    el.pause();
                    if (Math.abs(el.currentTime - target) > 1e-6) { el.currentTime = target; }
                    entry.target = target;
                }
            } catch (err) {
                entry.failed = message(err);
            }
            out.push(entry);
        });
        return out;
    };

    state.mediaStatus = function () {
        var els = document.querySelectorAll('video, audio');
        return Array.prototype.map.call(els, function (el, index) {
            return {
                index: index,
                readyState: el.readyState,
                seeking: el.seeking,
                errorCode: el.error ? el.error.code : null
            };
        });
    };

    function wrapFactorySafely(adapter, value) {
        if (value === undefined || value === null) { return value; }
        try {
            return adapter.wrapFactory(value);
        } catch (err) {
            state.noteError(adapter.name, err);
            return value;
        }
    }

    state.wrapInstance = function (adapter, instance, track) {
        if (!instance || (typeof instance !== 'object' && typeof instance !== 'function')) {
            return instance;
        }
        if (state.patched.has(instance)) { return instance; }
        state.patched.add(instance);
        try {
            adapter.wrapInstance(instance);
        } catch (err) {
            state.noteError(adapter.name, err);
        }
        if (track) { state.instances.push({ adapter: adapter, instance: instance }); }
        return instance;
    };

    state.registerAdapter = function (adapter) {
        if (state.adapters[adapter.name]) { return false; }
        state.adapters[adapter.name] = adapter;
        var current = wrapFactorySafely(adapter, window[adapter.global]);
        try {
            Object.defineProperty(window, adapter.global, {
                configurable: true,
                enumerable: true,
                get: function () { return current; },
                set: function (value) { current = wrapFactorySafely(adapter, value); }
            });
        } catch (err) {
            state.noteError(adapter.name, err);
        }
        return true;
    };

    state.activeAdapters = function () {
        return Object.keys(state.adapters).filter(function (name) {
            try {
                return !!state.adapters[name].detect();
            } catch (err) {
                return false;
            }
        });
    };

    state.report = function () {
        return {
            ticks: state.ticks,
            pending: state.pending.size,
            instances: state.instances.length,
            adapters: state.activeAdapters(),
            errors: state.errors.slice()
        };
    };

    Object.defineProperty(window, NS, { value: state, enumerable: false });
})();
"#;

/// Outcome of declarative or library timeline synchronization
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineSyncReport {
    /// Objects visited
    pub total: u32,
    /// Objects successfully moved
    pub synced: u32,
    /// Per-object failures
    pub failed: Vec<String>,
}

/// Outcome of force-running pending frame callbacks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFlushReport {
    /// Callbacks invoked
    pub ran: u32,
    /// Batches run
    pub iterations: u32,
    /// Callbacks still pending afterwards
    pub pending: u32,
    /// Stopped by the iteration cap with callbacks still queued
    pub truncated: bool,
    /// Callback exceptions
    pub failed: Vec<String>,
}

/// Snapshot of the page-side runtime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeReport {
    /// Frame ticks observed
    pub ticks: u64,
    /// Pending frame callbacks
    pub pending: u32,
    /// Tracked library instances
    pub instances: u32,
    /// Adapters whose library is present
    pub adapters: Vec<String>,
    /// Errors swallowed by the runtime
    pub errors: Vec<String>,
}

/// Per-context automation state
///
/// Created with the context and dropped with it. Only the instrumentation,
/// patch, bootstrap and synchronization code receive it.
#[derive(Debug, Clone)]
pub struct AutomationState {
    namespace: String,
    runtime_installed: bool,
    installed_patches: Vec<String>,
    ticks_observed: u64,
}

impl Default for AutomationState {
    fn default() -> Self {
        Self::new()
    }
}

impl AutomationState {
    /// Fresh state with a unique namespace
    #[must_use]
    pub fn new() -> Self {
        Self {
            namespace: format!("__stillframe_{}", uuid::Uuid::new_v4().simple()),
            runtime_installed: false,
            installed_patches: Vec::new(),
            ticks_observed: 0,
        }
    }

    /// Global property the runtime lives under
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Runtime source bound to this namespace
    #[must_use]
    pub fn runtime_script(&self) -> String {
        RUNTIME_JS.replace(NAMESPACE_TOKEN, &self.namespace)
    }

    /// Bind an adapter or other page script to this namespace
    #[must_use]
    pub fn bind(&self, source: &str) -> String {
        source.replace(NAMESPACE_TOKEN, &self.namespace)
    }

    /// Expression calling a runtime method
    #[must_use]
    pub fn call(&self, method: &str, args: &str) -> String {
        format!("window[\"{}\"].{method}({args})", self.namespace)
    }

    /// Register the runtime as an init script
    pub async fn install_runtime(&mut self, driver: &mut dyn CaptureDriver) -> CaptureResult<()> {
        if self.runtime_installed {
            return Ok(());
        }
        driver.add_init_script(&self.runtime_script()).await?;
        self.runtime_installed = true;
        debug!(namespace = %self.namespace, "frame-callback runtime registered");
        Ok(())
    }

    /// Whether the runtime init script was registered
    #[must_use]
    pub const fn runtime_installed(&self) -> bool {
        self.runtime_installed
    }

    /// Record a patch as installed; `false` if it already was
    pub fn mark_patch_installed(&mut self, name: &str) -> bool {
        if self.installed_patches.iter().any(|p| p == name) {
            return false;
        }
        self.installed_patches.push(name.to_string());
        true
    }

    /// Patches installed in this context, in installation order
    #[must_use]
    pub fn installed_patches(&self) -> &[String] {
        &self.installed_patches
    }

    /// Last tick count read from the page
    #[must_use]
    pub const fn ticks_observed(&self) -> u64 {
        self.ticks_observed
    }

    /// Evaluate a runtime method and decode its JSON result
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        driver: &dyn CaptureDriver,
        method: &str,
        args: &str,
    ) -> CaptureResult<T> {
        let value = driver.evaluate(&self.call(method, args)).await?;
        serde_json::from_value(value).map_err(|e| {
            CaptureError::evaluation(format!("unexpected result from {method}: {e}"))
        })
    }

    /// Read the tick counter
    pub async fn read_ticks(&mut self, driver: &dyn CaptureDriver) -> CaptureResult<u64> {
        let ticks: u64 = self.invoke(driver, "readTicks", "").await?;
        self.ticks_observed = self.ticks_observed.max(ticks);
        Ok(ticks)
    }

    /// End the runtime's own frame loop; returns the final tick count
    pub async fn stop_heartbeat(&mut self, driver: &dyn CaptureDriver) -> CaptureResult<u64> {
        let ticks: Option<u64> = self.invoke(driver, "stopHeartbeat", "").await?;
        let ticks = ticks.unwrap_or(self.ticks_observed);
        self.ticks_observed = self.ticks_observed.max(ticks);
        Ok(ticks)
    }

    /// Read the runtime report
    pub async fn report(&self, driver: &dyn CaptureDriver) -> CaptureResult<RuntimeReport> {
        let report: Option<RuntimeReport> = self.invoke(driver, "report", "").await?;
        Ok(report.unwrap_or_default())
    }
}
