use crate::domain::calendar::{UNIX_DAY, format_date, format_hhmm, start_of_day};
use crate::domain::history::{HistoryError, HistoryLog};
use crate::domain::models::LogRecord;
use crate::domain::output_scripts::{Evaluation, OutputScript, ScriptSet};

pub const DEFAULT_BATCH_LIMIT: usize = 30;
pub const DONATOR_BATCH_LIMIT: usize = 100;
pub const REQUEST_BODY_LIMIT: usize = 4000;
pub const DEFAULT_LOOKBACK_DAYS: i64 = 14;
pub const DONATOR_LOOKBACK_DAYS: i64 = 90;
pub const EXTENDED_CHANNELS: usize = 6;

const GENERATION: &str = "generation";
const CONSUMPTION: &str = "consumption";
const VOLTAGE: &str = "voltage";
const EXTENDED_PREFIX: &str = "extended_";

pub fn batch_limit(donator: bool) -> usize {
    if donator {
        DONATOR_BATCH_LIMIT
    } else {
        DEFAULT_BATCH_LIMIT
    }
}

/// Cumulative generation/consumption at local midnight of `day_start`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DayBase {
    pub day_start: Option<i64>,
    pub generation_wh: f64,
    pub consumption_wh: f64,
}

impl DayBase {
    pub fn covers(&self, local_time: i64) -> bool {
        self.day_start == Some(start_of_day(local_time))
    }

    pub fn from_record(scripts: &ScriptSet, midnight: &LogRecord, day_start: i64) -> Self {
        let total = |name: &str| {
            scripts
                .find(name)
                .map(|script| script.run(None, midnight, Evaluation::Total { scale: 1.0 }))
                .unwrap_or(0.0)
        };

        Self {
            day_start: Some(day_start),
            generation_wh: total(GENERATION),
            consumption_wh: total(CONSUMPTION),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyPower {
    pub energy_wh: f64,
    pub power_w: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtendedValue {
    pub value: f64,
    pub precision: u8,
}

/// Values for one sampling interval; `None` means no script produced the value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricRow {
    pub generation: Option<EnergyPower>,
    pub consumption: Option<EnergyPower>,
    pub voltage: Option<f64>,
    pub extended: [Option<ExtendedValue>; EXTENDED_CHANNELS],
}

impl MetricRow {
    pub fn compute(
        scripts: &ScriptSet,
        old: &LogRecord,
        new: &LogRecord,
        elapsed_hours: f64,
        base: &DayBase,
    ) -> Self {
        let rate = Evaluation::Rate { elapsed_hours };
        let mut row = Self::default();

        for script in scripts.iter() {
            match script.name() {
                GENERATION => {
                    row.generation = energy_power(script, old, new, rate, base.generation_wh);
                }
                CONSUMPTION => {
                    row.consumption = energy_power(script, old, new, rate, base.consumption_wh);
                }
                VOLTAGE => {
                    row.voltage = Some(script.run(Some(old), new, rate)).filter(|v| *v >= 0.0);
                }
                name => {
                    if let Some(index) = extended_index(name) {
                        row.extended[index] = Some(ExtendedValue {
                            value: script.run(Some(old), new, rate),
                            precision: script.precision(),
                        });
                    }
                }
            }
        }

        row
    }

    /// Appends `date,time,genE,genP,conE,conP,,volt[,ext...]` labelled with `label_local`.
    pub fn write(&self, out: &mut String, label_local: i64, donator: bool) {
        out.push_str(&format_date(label_local));
        out.push(',');
        out.push_str(&format_hhmm(label_local));

        for pair in [self.generation, self.consumption] {
            match pair {
                Some(value) => {
                    out.push_str(&format!(",{:.0},{:.0}", value.energy_wh, value.power_w))
                }
                None => out.push_str(",,"),
            }
        }

        match self.voltage {
            Some(volts) => out.push_str(&format!(",,{volts:.1}")),
            None => out.push_str(",,"),
        }

        if !donator {
            return;
        }
        if let Some(last) = self.extended.iter().rposition(Option::is_some) {
            for slot in &self.extended[..=last] {
                out.push(',');
                if let Some(extended) = slot {
                    out.push_str(&format!(
                        "{:.*}",
                        usize::from(extended.precision),
                        extended.value
                    ));
                }
            }
        }
    }
}

fn energy_power(
    script: &OutputScript,
    old: &LogRecord,
    new: &LogRecord,
    rate: Evaluation,
    base_wh: f64,
) -> Option<EnergyPower> {
    let power_w = script.run(Some(old), new, rate);
    if power_w < 0.0 {
        return None;
    }

    Some(EnergyPower {
        energy_wh: script.run(None, new, Evaluation::Total { scale: 1.0 }) - base_wh,
        power_w,
    })
}

fn extended_index(name: &str) -> Option<usize> {
    let number: usize = name.strip_prefix(EXTENDED_PREFIX)?.parse().ok()?;
    (1..=EXTENDED_CHANNELS).contains(&number).then(|| number - 1)
}

/// Form-encoded `data=` body accumulating rows separated by `;`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchBuffer {
    body: String,
    rows: usize,
}

impl BatchBuffer {
    pub fn push_row(&mut self, row: &MetricRow, label_local: i64, donator: bool) {
        if self.rows == 0 {
            self.body.push_str("data=");
        } else {
            self.body.push(';');
        }
        row.write(&mut self.body, label_local, donator);
        self.rows += 1;
    }

    pub fn should_flush(&self, donator: bool, caught_up: bool, at_midnight: bool) -> bool {
        self.rows > 0
            && (self.rows >= batch_limit(donator)
                || self.body.len() >= REQUEST_BODY_LIMIT
                || caught_up
                || at_midnight)
    }

    /// Starts a new batch; the body stays queued until it is sent.
    pub fn close_rows(&mut self) {
        self.rows = 0;
    }

    pub fn replace_body(&mut self, body: &str) {
        self.body.clear();
        self.body.push_str(body);
        self.rows = 0;
    }

    pub fn clear(&mut self) {
        self.body.clear();
        self.rows = 0;
    }

    pub fn clear_body(&mut self) {
        self.body.clear();
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
}

/// The two log records bracketing the interval being composed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordPair {
    old: Option<LogRecord>,
    new: Option<LogRecord>,
}

impl RecordPair {
    pub fn release(&mut self) {
        self.old = None;
        self.new = None;
    }

    pub fn is_empty(&self) -> bool {
        self.old.is_none() && self.new.is_none()
    }

    /// Resolves records for `[old_key, new_key)`. When the window advanced by exactly
    /// one interval the previous newer record moves into the older slot instead of
    /// being read again.
    pub fn bracket<H: HistoryLog + ?Sized>(
        &mut self,
        history: &H,
        old_key: i64,
        new_key: i64,
    ) -> Result<(&LogRecord, &LogRecord), HistoryError> {
        let old = match self.old.take() {
            Some(record) if record.unix_time == old_key => record,
            _ => match self.new.take() {
                Some(record) if record.unix_time == old_key => record,
                _ => history.read_at_or_after(old_key)?,
            },
        };
        let new = history.read_at_or_after(new_key)?;

        let old = self.old.insert(old);
        let new = self.new.insert(new);
        Ok((&*old, &*new))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostingWindow {
    pub server_last_post: Option<i64>,
    pub now_local: i64,
    pub first_key_local: i64,
    pub interval: i64,
    pub donator: bool,
    pub reload: bool,
    pub begin_posting: i64,
}

impl PostingWindow {
    /// Local time of the start of the first interval to post.
    pub fn start(&self) -> i64 {
        let lookback_days = if self.donator {
            DONATOR_LOOKBACK_DAYS
        } else {
            DEFAULT_LOOKBACK_DAYS
        };
        let lookback = start_of_day(self.now_local - UNIX_DAY * lookback_days);

        let mut start = self.server_last_post.unwrap_or(0);
        if start < lookback || self.reload {
            start = lookback;
        }
        if self.first_key_local > start {
            start = round_up(self.first_key_local, self.interval);
        }
        if start < self.begin_posting {
            start = self.begin_posting;
        }
        start
    }
}

fn round_up(value: i64, interval: i64) -> i64 {
    if interval <= 0 {
        return value;
    }
    let remainder = value.rem_euclid(interval);
    if remainder == 0 {
        value
    } else {
        value + interval - remainder
    }
}
