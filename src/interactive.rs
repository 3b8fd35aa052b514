//! Interactive chat loop for `iota interactive`.
//!
//! History lives in memory for the length of the session. Typing `exit` (or closing stdin)
//! ends the loop, flushes buffered exchanges to the vector store and prints
//! [`SessionAnalytics`].

use std::{
    fmt,
    io::{BufRead, Write, stdout},
    time::{Duration, Instant},
};

use crossterm::{
    ExecutableCommand,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use tracing::warn;

use crate::{
    conversation::HistoryMessage,
    error::Result,
    workflow::{Orchestrator, TurnOutcome},
};

/// Counters for one interactive session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionAnalytics {
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub cache_hits: usize,
    pub failed_turns: usize,
    reply_chars: usize,
    generation_time: Duration,
    started: Instant,
}

impl Default for SessionAnalytics {
    fn default() -> Self {
        Self {
            user_messages: 0,
            assistant_messages: 0,
            cache_hits: 0,
            failed_turns: 0,
            reply_chars: 0,
            generation_time: Duration::ZERO,
            started: Instant::now(),
        }
    }
}

impl SessionAnalytics {
    pub fn record_reply(&mut self, outcome: &TurnOutcome) {
        self.user_messages += 1;
        self.assistant_messages += 1;
        self.reply_chars += outcome.response.chars().count();
        self.generation_time += outcome.elapsed;
        if outcome.cached {
            self.cache_hits += 1;
        }
    }

    pub fn record_failure(&mut self) {
        self.user_messages += 1;
        self.failed_turns += 1;
    }

    pub fn average_reply_chars(&self) -> f64 {
        if self.assistant_messages == 0 {
            0.0
        } else {
            self.reply_chars as f64 / self.assistant_messages as f64
        }
    }

    pub fn average_response_time(&self) -> Duration {
        match u32::try_from(self.assistant_messages) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.generation_time / n,
        }
    }

    pub fn session_hit_rate(&self) -> f64 {
        if self.assistant_messages == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.assistant_messages as f64
        }
    }

    pub fn duration(&self) -> Duration {
        self.started.elapsed()
    }
}

impl fmt::Display for SessionAnalytics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Session analytics")?;
        writeln!(f, "  Duration:            {:.1} min", self.duration().as_secs_f64() / 60.0)?;
        writeln!(f, "  Your messages:       {}", self.user_messages)?;
        writeln!(f, "  Replies:             {}", self.assistant_messages)?;
        writeln!(f, "  Failed turns:        {}", self.failed_turns)?;
        writeln!(f, "  Avg reply length:    {:.0} chars", self.average_reply_chars())?;
        writeln!(
            f,
            "  Avg response time:   {:.2}s",
            self.average_response_time().as_secs_f64()
        )?;
        write!(
            f,
            "  Cache hits:          {} ({:.1}%)",
            self.cache_hits,
            self.session_hit_rate() * 100.0
        )
    }
}

fn print_colored(text: &str, color: Color) -> Result<()> {
    let mut out = stdout();
    out.execute(SetForegroundColor(color))?;
    out.execute(Print(text))?;
    out.execute(ResetColor)?;
    out.flush()?;
    Ok(())
}

/// Run the read-respond loop until `exit` or end of input.
pub async fn run<R: BufRead>(
    bot: &Orchestrator,
    input: R,
    top_k: usize,
) -> Result<SessionAnalytics> {
    let mut analytics = SessionAnalytics::default();
    let mut history: Vec<HistoryMessage> = Vec::new();
    let name = bot.persona().display_name().to_string();
    let mut lines = input.lines();

    println!("Chatting with {name}. Type `exit` to quit.");
    loop {
        print_colored("\nYou: ", Color::Green)?;
        let Some(line) = lines.next() else {
            println!();
            break;
        };
        let line = line?;
        let message = line.trim();
        if message.eq_ignore_ascii_case("exit") {
            break;
        }
        if message.is_empty() {
            continue;
        }

        match bot.respond_with(message, history.clone(), top_k).await {
            Ok(outcome) => {
                print_colored(&format!("{name}: "), Color::Cyan)?;
                println!("{}", outcome.response);
                history.push(HistoryMessage::user(message));
                history.push(HistoryMessage::assistant(outcome.response.clone()));
                analytics.record_reply(&outcome);
            }
            Err(failure) => {
                print_colored(&format!("Error: {}\n", failure.error), Color::Red)?;
                analytics.record_failure();
            }
        }
    }

    if let Err(e) = bot.flush_pending().await {
        warn!("Could not save the last exchanges: {}", e);
    }
    Ok(analytics)
}
