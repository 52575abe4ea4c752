//! Line-oriented debug monitor read from stdin when `--debug` is given.

use std::io::{self, BufRead, Write};

use vm64_core::{Condition, Machine};

pub const HELP_TEXT: &str = "\
b CB IP [cond]  add a breakpoint
d CB IP         delete a breakpoint
w OPERAND       add a watchpoint
s               single-step
c               continue
p               pause
r               show registers
x ADDR LEN      show memory
q               quit";

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Break {
        code_base: u64,
        ip: u64,
        condition: String,
    },
    Delete {
        code_base: u64,
        ip: u64,
    },
    Watch(String),
    Step,
    Continue,
    Pause,
    Registers,
    Memory {
        address: u64,
        len: u64,
    },
    Quit,
    Help,
}

/// Parses one monitor line; `Ok(None)` for a blank one.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    let (head, rest) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(head, rest)| (head, rest.trim()));
    let mut words = rest.split_whitespace();
    let mut number = |what: &str| {
        words
            .next()
            .ok_or_else(|| format!("{head}: missing {what}"))
            .and_then(parse_number)
    };

    let command = match head {
        "" => return Ok(None),
        "b" => {
            let code_base = number("CB")?;
            let ip = number("IP")?;
            let condition = words.collect::<Vec<_>>().join(" ");
            Command::Break {
                code_base,
                ip,
                condition,
            }
        }
        "d" => Command::Delete {
            code_base: number("CB")?,
            ip: number("IP")?,
        },
        "w" if !rest.is_empty() => Command::Watch(rest.to_string()),
        "w" => return Err("w: missing operand".to_string()),
        "s" => Command::Step,
        "c" => Command::Continue,
        "p" => Command::Pause,
        "r" => Command::Registers,
        "x" => Command::Memory {
            address: number("ADDR")?,
            len: number("LEN")?,
        },
        "q" => Command::Quit,
        "h" | "?" | "help" => Command::Help,
        other => return Err(format!("unknown command '{other}' (h for help)")),
    };
    Ok(Some(command))
}

fn parse_number(text: &str) -> Result<u64, String> {
    let parsed = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .map_or_else(|| text.parse(), |hex| u64::from_str_radix(hex, 16));
    parsed.map_err(|_| format!("invalid number: {text}"))
}

/// Runs `command`; returns `false` once the session should end.
pub fn execute(machine: &Machine, command: Command, out: &mut impl Write) -> io::Result<bool> {
    let debug = machine.debug();
    match command {
        Command::Break {
            code_base,
            ip,
            condition,
        } => match Condition::parse(&condition) {
            Ok(condition) => {
                debug.add_breakpoint(code_base, ip, condition);
                writeln!(out, "breakpoint at {code_base:#x}:{ip:#x}")?;
            }
            Err(e) => writeln!(out, "error: {e}")?,
        },
        Command::Delete { code_base, ip } => {
            if debug.remove_breakpoint(code_base, ip) {
                writeln!(out, "deleted {code_base:#x}:{ip:#x}")?;
            } else {
                writeln!(out, "no breakpoint at {code_base:#x}:{ip:#x}")?;
            }
        }
        Command::Watch(operand) => match debug.add_watchpoint(&operand) {
            Ok(()) => writeln!(out, "watching {operand}")?,
            Err(e) => writeln!(out, "error: {e}")?,
        },
        Command::Step => {
            debug.single_step();
            debug.resume();
        }
        Command::Continue => debug.resume(),
        Command::Pause => debug.pause(),
        Command::Registers => write!(out, "{}", machine.context(0, 0))?,
        Command::Memory { address, len } => {
            let context = machine.context(address, len);
            for (row, chunk) in context.window.chunks(16).enumerate() {
                let bytes: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
                writeln!(
                    out,
                    "{:#012x}: {}",
                    context.window_start + row as u64 * 16,
                    bytes.join(" ")
                )?;
            }
        }
        Command::Quit => {
            machine.request_shutdown();
            return Ok(false);
        }
        Command::Help => writeln!(out, "{HELP_TEXT}")?,
    }
    out.flush()?;
    Ok(true)
}

/// Reads commands from `input` until `q` or end of input.
pub fn run(machine: &Machine, input: impl BufRead, out: &mut impl Write) -> io::Result<()> {
    for line in input.lines() {
        match parse_command(&line?) {
            Ok(Some(command)) => {
                if !execute(machine, command, out)? {
                    break;
                }
            }
            Ok(None) => {}
            Err(message) => writeln!(out, "error: {message}")?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{execute, parse_command, Command};
    use vm64_core::{encode_instruction, Machine, MachineConfig, BIOS_START};

    fn machine() -> Machine {
        let mut config = MachineConfig::default();
        config.memory.size_mib = 2;
        config.rtc.enabled = false;
        let machine = Machine::new(&config);
        let mut image = Vec::new();
        encode_instruction("mov .64bit <%FER0>, <$(3)>", &mut image).unwrap();
        encode_instruction("hlt", &mut image).unwrap();
        machine.load_firmware(&image).unwrap();
        machine
    }

    fn output(machine: &Machine, line: &str) -> (bool, String) {
        let mut out = Vec::new();
        let command = parse_command(line).unwrap().unwrap();
        let keep_going = execute(machine, command, &mut out).unwrap();
        (keep_going, String::from_utf8(out).unwrap())
    }

    #[test]
    fn parses_breakpoint_with_condition() {
        assert_eq!(
            parse_command("b 0xC1800 15 valequal(<%FER0>, <$(3)>)"),
            Ok(Some(Command::Break {
                code_base: 0xC1800,
                ip: 15,
                condition: "valequal(<%FER0>, <$(3)>)".into(),
            }))
        );
        assert_eq!(parse_command("   "), Ok(None));
    }

    #[test]
    fn parse_errors_are_reported() {
        assert!(parse_command("x 0x10").unwrap_err().contains("missing LEN"));
        assert!(parse_command("d zz 1").unwrap_err().contains("invalid number"));
        assert!(parse_command("jump").unwrap_err().contains("unknown command"));
    }

    #[test]
    fn breakpoints_can_be_added_and_removed() {
        let machine = machine();
        let (_, text) = output(&machine, &format!("b {BIOS_START} 15"));
        assert!(text.contains("breakpoint at"));
        assert_eq!(machine.debug().breakpoints(), vec![(BIOS_START, 15)]);
        let (_, text) = output(&machine, &format!("d {BIOS_START} 15"));
        assert!(text.starts_with("deleted"));
        assert!(machine.debug().breakpoints().is_empty());
    }

    #[test]
    fn memory_dump_is_sixteen_bytes_per_row() {
        let machine = machine();
        let (_, text) = output(&machine, &format!("x {BIOS_START} 20"));
        let rows: Vec<&str> = text.lines().collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].starts_with(&format!("{BIOS_START:#012x}: 20 64")));
    }

    #[test]
    fn quit_requests_shutdown() {
        let machine = machine();
        let (keep_going, _) = output(&machine, "q");
        assert!(!keep_going);
        assert_eq!(machine.run(), vm64_core::RunState::HaltRequested);
        assert_eq!(machine.registers().general(0), 0);
    }
}
