use crate::sequencer::{Hooks, StepMark};
use std::io::{BufRead, Write};
use std::sync::Mutex;
use tracing::{info, warn};

/// Terminal operator surface. Questions go to stderr and are answered on stdin;
/// without a terminal they take `default_answer`.
pub struct ConsoleHooks {
    interactive: bool,
    default_answer: bool,
    prompt: Mutex<()>,
}

impl ConsoleHooks {
    pub fn new(interactive: bool, default_answer: bool) -> Self {
        Self {
            interactive,
            default_answer,
            prompt: Mutex::new(()),
        }
    }
}

/// `y`/`yes` and `n`/`no`, case-insensitive. Anything else is no answer.
pub fn parse_answer(line: &str) -> Option<bool> {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

impl Hooks for ConsoleHooks {
    fn set_status(&self, text: &str) {
        info!(status = text);
    }

    fn mark_step(&self, step: &str, mark: StepMark) {
        info!(step, mark = %mark);
    }

    fn report_sensor(&self, name: &str, ok: bool) {
        if ok {
            info!(sensor = name, "sensor OK");
        } else {
            warn!(sensor = name, "sensor KO");
        }
    }

    fn ask_operator(&self, title: &str, question: &str) -> bool {
        if !self.interactive {
            info!(title, question, answer = self.default_answer, "no operator terminal");
            return self.default_answer;
        }
        let _guard = match self.prompt.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let stdin = std::io::stdin();
        loop {
            eprint!("[{title}] {question} [y/n] ");
            let _ = std::io::stderr().flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => return self.default_answer,
                Ok(_) => {
                    if let Some(answer) = parse_answer(&line) {
                        info!(title, answer, "operator answered");
                        return answer;
                    }
                }
            }
        }
    }
}
