//! Machine-routed log channel.
//!
//! Ambient module logging goes through the `log` facade as usual; this
//! channel carries the guest-visible events (stub opcodes, unimplemented
//! register pokes, attach warnings) that a frontend may want to intercept
//! per-machine. Messages with no explicit machine target are resolved
//! through a thread-local slot naming the machine currently driven by the
//! calling thread.

use std::cell::RefCell;
use std::fmt;

use rustagb_utils::WeakPointer;

use super::gba::GameBoyAdvance;

bitflags! {
    pub struct LogLevels: u32 {
        const FATAL = 0x01;
        const ERROR = 0x02;
        const WARN = 0x04;
        const INFO = 0x08;
        const DEBUG = 0x10;
        const STUB = 0x20;
    }
}

impl Default for LogLevels {
    fn default() -> LogLevels {
        LogLevels::FATAL | LogLevels::ERROR | LogLevels::WARN | LogLevels::INFO
    }
}

pub type LogHandler = Box<dyn FnMut(LogLevels, &str)>;

/// Log levels spoken by an attached debugger frontend.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum DebuggerLogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Translate a debugger-originated level into the machine log channel.
pub fn from_debugger_level(level: DebuggerLogLevel) -> LogLevels {
    match level {
        DebuggerLogLevel::Debug => LogLevels::DEBUG,
        DebuggerLogLevel::Info => LogLevels::INFO,
        DebuggerLogLevel::Warn => LogLevels::WARN,
        DebuggerLogLevel::Error => LogLevels::ERROR,
    }
}

thread_local! {
    static CURRENT_MACHINE: RefCell<WeakPointer<GameBoyAdvance>> =
        RefCell::new(WeakPointer::default());
}

/// Mark `gba` as the machine driven by the calling thread. The pointer must
/// stay valid until [`clear_thread_machine`] runs; re-register after moving
/// the machine.
pub fn set_thread_machine(gba: &mut GameBoyAdvance) {
    let ptr = WeakPointer::new(gba as *mut GameBoyAdvance);
    CURRENT_MACHINE.with(|m| *m.borrow_mut() = ptr);
}

pub fn clear_thread_machine() {
    CURRENT_MACHINE.with(|m| *m.borrow_mut() = WeakPointer::default());
}

/// Drop guard: a machine going away must not leave a dangling thread slot
pub(crate) fn clear_if_current(gba: *const GameBoyAdvance) {
    CURRENT_MACHINE.with(|m| {
        let mut slot = m.borrow_mut();
        if slot.as_ptr() as *const GameBoyAdvance == gba {
            *slot = WeakPointer::default();
        }
    });
}

#[inline]
fn forward_to_facade(level: LogLevels, args: &fmt::Arguments<'_>) {
    let facade_level = match level {
        LogLevels::FATAL | LogLevels::ERROR => log::Level::Error,
        LogLevels::WARN => log::Level::Warn,
        LogLevels::INFO => log::Level::Info,
        _ => log::Level::Debug,
    };
    log::log!(facade_level, "{}", args);
}

fn log_to_machine(gba: &mut GameBoyAdvance, level: LogLevels, args: fmt::Arguments<'_>) {
    if let Some(handler) = gba.log_handler.as_mut() {
        handler(level, &args.to_string());
        return;
    }
    if !gba.log_level.contains(level) && level != LogLevels::FATAL {
        return;
    }
    forward_to_facade(level, &args);
    if level == LogLevels::FATAL {
        std::process::abort();
    }
}

/// Emit a message on the machine log channel. With `target == None` the
/// machine is resolved from the thread-local slot; when no machine is
/// registered the message falls through to the `log` facade unfiltered.
pub fn gba_log(target: Option<&mut GameBoyAdvance>, level: LogLevels, args: fmt::Arguments<'_>) {
    match target {
        Some(gba) => log_to_machine(gba, level, args),
        None => {
            // clone the slot so a handler may log without re-entering the cell
            let mut ptr = CURRENT_MACHINE.with(|m| m.borrow().clone());
            if ptr.is_null() {
                forward_to_facade(level, &args);
                if level == LogLevels::FATAL {
                    std::process::abort();
                }
            } else {
                log_to_machine(&mut ptr, level, args);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_handler_receives_filtered_out_levels() {
        let mut gba = GameBoyAdvance::new();
        gba.log_level = LogLevels::ERROR;
        let seen = Rc::new(Cell::new(0u32));
        let seen_clone = seen.clone();
        gba.log_handler = Some(Box::new(move |level, _msg| {
            seen_clone.set(seen_clone.get() | level.bits());
        }));

        gba_log(Some(&mut gba), LogLevels::DEBUG, format_args!("below mask"));
        gba_log(Some(&mut gba), LogLevels::ERROR, format_args!("in mask"));

        // an installed handler sees everything, mask or not
        assert_eq!(
            seen.get(),
            (LogLevels::DEBUG | LogLevels::ERROR).bits()
        );
    }

    #[test]
    fn test_thread_local_machine_resolution() {
        let mut gba = Box::new(GameBoyAdvance::new());
        let seen = Rc::new(Cell::new(false));
        let seen_clone = seen.clone();
        gba.log_handler = Some(Box::new(move |_level, msg| {
            seen_clone.set(msg.contains("anonymous"));
        }));

        set_thread_machine(&mut gba);
        gba_log(None, LogLevels::INFO, format_args!("anonymous message"));
        clear_thread_machine();

        assert!(seen.get());

        // with no machine registered the message only hits the facade
        gba_log(None, LogLevels::INFO, format_args!("nobody home"));
    }

    #[test]
    fn test_debugger_level_shim() {
        assert_eq!(from_debugger_level(DebuggerLogLevel::Warn), LogLevels::WARN);
        assert_eq!(
            from_debugger_level(DebuggerLogLevel::Error),
            LogLevels::ERROR
        );
    }
}
