//! One isolated script interpreter per node: bounded heap, bounded
//! per-call CPU time, deterministic entry points (§4.B).

mod alarm;

pub use alarm::install_handler;
use mlua::Lua;

use crate::tree::node::DEFAULT_MEM_LIMIT;

/// What a completed dispatch produced, for the caller (`Tree::dispatch`)
/// to fold into the node's bookkeeping. `Sandbox` itself holds no
/// reference back to the node it belongs to.
pub struct EnterOutcome {
    pub cpu_seconds: f64,
    /// The CPU alarm fired at least once during this dispatch.
    pub blacklisted: bool,
    /// A single diagnostic line, if the dispatch raised an error. Already
    /// logged to stderr; the caller is responsible for fanning it out to
    /// subscribers (§7).
    pub diagnostic: Option<String>,
}

/// A node's isolated Lua interpreter.
///
/// `lua` is `None` before the first [`Sandbox::boot`]. Every dispatch goes
/// through [`Sandbox::enter`], which implements the uniform wrapper
/// described in §4.B: CPU alarm, traceback capture, bounded GC step,
/// profiling.
pub struct Sandbox {
    lua: Option<Lua>,
}

impl Sandbox {
    #[must_use]
    pub fn new() -> Self {
        Self { lua: None }
    }

    #[must_use]
    pub fn is_booted(&self) -> bool {
        self.lua.is_some()
    }

    /// Re-initializes the sandbox from the node's code file: discards all
    /// prior state, creates a fresh interpreter with the per-node memory
    /// ceiling, rebinds host capabilities (`bind`), then runs the code's
    /// top level (which typically just defines `on_*` handler functions).
    pub fn boot(
        &mut self,
        code: &str,
        bind: impl FnOnce(&Lua) -> mlua::Result<()>,
    ) -> crate::errors::Result<()> {
        let lua = Lua::new();
        lua.set_memory_limit(DEFAULT_MEM_LIMIT)?;
        lua.set_interrupt(|_lua| {
            if alarm::alarm_fired() {
                Err(mlua::Error::RuntimeError("alarm".into()))
            } else {
                Ok(mlua::VmState::Continue)
            }
        });
        bind(&lua)?;
        lua.load(code).exec()?;
        self.lua = Some(lua);
        Ok(())
    }

    #[must_use]
    pub fn lua(&self) -> Option<&Lua> {
        self.lua.as_ref()
    }

    /// The uniform "enter" wrapper (§4.B points 1–5). `body` performs the
    /// actual dispatch (e.g. calling `on_render(w, h)`); its `Err` is
    /// caught here and never seen by the caller as a propagating error —
    /// only as [`EnterOutcome::diagnostic`].
    pub fn enter(
        &mut self,
        node_path: &str,
        body: impl FnOnce(&Lua) -> mlua::Result<()>,
    ) -> EnterOutcome {
        let Some(lua) = self.lua.as_ref() else {
            return EnterOutcome {
                cpu_seconds: 0.0,
                blacklisted: false,
                diagnostic: None,
            };
        };

        let guard = alarm::ArmedAlarm::arm();
        let started = std::time::Instant::now();
        let result = body(lua);
        let cpu_seconds = started.elapsed().as_secs_f64();
        let blacklisted = alarm::alarm_fired();
        drop(guard);

        let _ = lua.gc_step_kbytes(16);

        let diagnostic = result.err().map(|err| {
            let kind = classify(&err);
            let line = format!("{kind}: {err}");
            log::error!("[{node_path}] {line}");
            line
        });

        EnterOutcome {
            cpu_seconds,
            blacklisted,
            diagnostic,
        }
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}

fn classify(err: &mlua::Error) -> &'static str {
    match err {
        mlua::Error::MemoryError(_) => "memory error",
        mlua::Error::RuntimeError(_) | mlua::Error::CallbackError { .. } => "runtime error",
        _ => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_before_boot_is_a_no_op() {
        let mut sandbox = Sandbox::new();
        let outcome = sandbox.enter("root", |_| Ok(()));
        assert!(!outcome.blacklisted);
        assert!(outcome.diagnostic.is_none());
    }

    #[test]
    fn boot_runs_top_level_code() {
        let mut sandbox = Sandbox::new();
        sandbox.boot("x = 1 + 1", |_| Ok(())).unwrap();
        let lua = sandbox.lua().unwrap();
        let x: i64 = lua.globals().get("x").unwrap();
        assert_eq!(x, 2);
    }

    #[test]
    fn runtime_error_is_captured_not_propagated() {
        let mut sandbox = Sandbox::new();
        sandbox.boot("", |_| Ok(())).unwrap();
        let outcome = sandbox.enter("a/b", |lua| lua.load("error('boom')").exec());
        assert!(outcome.diagnostic.unwrap().contains("boom"));
    }
}
