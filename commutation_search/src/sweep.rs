#![allow(async_fn_in_trait)]

use std::{
    collections::VecDeque,
    io::{self, BufRead as _, Write as _},
};

use tokio::sync::oneshot;
use tracing::{Span, error, info, info_span, instrument, warn};

use crate::{
    controller::Connector,
    procedure::CalibrationDriver,
    results::{ResultSet, ResultStore},
};

#[derive(Debug, thiserror::Error)]
pub enum SweepRangeError {
    #[error("step must be positive, got {0}")]
    NonPositiveStep(i32),

    #[error("start {low} must be below stop {high}")]
    Empty { low: i32, high: i32 },
}

/// Offsets `low, low + step, ...` strictly below `high`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepRange {
    low: i32,
    high: i32,
    step: i32,
}

impl SweepRange {
    pub fn new(low: i32, high: i32, step: i32) -> Result<Self, SweepRangeError> {
        if step <= 0 {
            return Err(SweepRangeError::NonPositiveStep(step));
        }
        if low >= high {
            return Err(SweepRangeError::Empty { low, high });
        }

        Ok(Self { low, high, step })
    }

    pub fn low(&self) -> i32 {
        self.low
    }

    pub fn high(&self) -> i32 {
        self.high
    }

    pub fn offsets(&self) -> VecDeque<i32> {
        (self.low..self.high).step_by(self.step as usize).collect()
    }
}

/// Signals a user interrupt. The future resolves once per interrupt.
pub trait InterruptSource {
    async fn interrupted(&mut self);
}

/// Ctrl-C on the controlling terminal.
pub struct CtrlC;

impl InterruptSource for CtrlC {
    async fn interrupted(&mut self) {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Decides whether an interrupted sweep goes on.
pub trait Operator {
    async fn confirm_continue(&mut self) -> bool;
}

/// An empty answer or `y` continues; anything else aborts.
pub fn wants_continue(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "" | "y")
}

/// Waits for the prompt answer unless an interrupt comes first, which
/// aborts. End of input or a read error aborts too.
pub async fn answer_or_interrupt(
    answer: impl Future<Output = io::Result<Option<String>>>,
    interrupt: impl Future<Output = ()>,
) -> bool {
    tokio::select! {
        answer = answer => match answer {
            Ok(Some(line)) => wants_continue(&line),
            Ok(None) => false,
            Err(e) => {
                error!("Failed to read answer: {}", e);
                false
            }
        },
        () = interrupt => {
            info!("Interrupted at the prompt");
            false
        }
    }
}

fn read_answer() -> io::Result<Option<String>> {
    let mut stdout = io::stdout();
    write!(stdout, "Continue? [Y/n] ")?;
    stdout.flush()?;

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line)? {
        0 => Ok(None),
        _ => Ok(Some(line)),
    }
}

/// Prompts on stdout and reads the answer from stdin. A second Ctrl-C at
/// the prompt aborts.
pub struct ConsoleOperator;

impl Operator for ConsoleOperator {
    async fn confirm_continue(&mut self) -> bool {
        // not spawn_blocking: runtime shutdown waits on blocking tasks
        let (sender, receiver) = oneshot::channel();
        std::thread::spawn(move || {
            let _ = sender.send(read_answer());
        });

        let answer = async {
            receiver
                .await
                .unwrap_or_else(|_| Err(io::Error::other("prompt thread stopped")))
        };

        let mut ctrl_c = CtrlC;
        answer_or_interrupt(answer, ctrl_c.interrupted()).await
    }
}

#[derive(Debug, Clone)]
pub struct SweepOutcome {
    /// Offsets captured during this run, in order.
    pub completed: Vec<i32>,
    pub aborted: bool,
    /// Everything in the result file when the sweep ended.
    pub results: ResultSet,
}

/// Walks the offset queue one offset at a time, persisting after each
/// success.
pub struct Sweep<C, I, O> {
    driver: CalibrationDriver<C>,
    store: ResultStore,
    interrupts: I,
    operator: O,
    span: Span,
}

impl<C, I, O> Sweep<C, I, O>
where
    C: Connector,
    I: InterruptSource,
    O: Operator,
{
    pub fn new(
        driver: CalibrationDriver<C>,
        store: ResultStore,
        interrupts: I,
        operator: O,
        parent: &Span,
    ) -> Self {
        let span = info_span!(parent: parent, "sweep", file = %store.path().display());

        Self {
            driver,
            store,
            interrupts,
            operator,
            span,
        }
    }

    #[instrument(parent = &self.span, skip(self))]
    pub async fn run(&mut self, range: &SweepRange) -> anyhow::Result<SweepOutcome> {
        let mut results = self.store.load_existing()?;
        let mut pending = range.offsets();
        let requested = pending.len();
        pending.retain(|offset| !results.contains(*offset));

        if pending.len() < requested {
            info!(
                "Resuming from {}: {} of {} offsets already captured",
                self.store.path().display(),
                requested - pending.len(),
                requested
            );
        }

        let mut completed = Vec::new();

        while let Some(&offset) = pending.front() {
            info!("* Checking offset {}", offset);

            let attempt = tokio::select! {
                result = self.driver.acquire(offset) => Some(result),
                () = self.interrupts.interrupted() => None,
            };

            match attempt {
                Some(Ok(dataset)) => {
                    results.insert(offset, dataset);
                    self.store.save(&results)?;
                    info!("Successfully completed offset angle: {}", offset);

                    completed.push(offset);
                    pending.pop_front();
                }
                Some(Err(e)) => return Err(e),
                None => {
                    warn!("Interrupted while checking offset {}", offset);

                    if !self.operator.confirm_continue().await {
                        info!("Sweep aborted with {} offsets pending", pending.len());
                        return Ok(SweepOutcome {
                            completed,
                            aborted: true,
                            results,
                        });
                    }
                }
            }
        }

        info!("Successfully completed all requested offsets");

        Ok(SweepOutcome {
            completed,
            aborted: false,
            results,
        })
    }
}
