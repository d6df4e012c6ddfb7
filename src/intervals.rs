/// A contiguous span of video time in seconds, `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub start: f64,
    pub end: f64,
}

impl Interval {
    /// Returns `None` for empty, inverted or non-finite spans
    pub fn new(start: f64, end: f64) -> Option<Self> {
        if start.is_finite() && end.is_finite() && start < end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    pub fn len(&self) -> f64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        !(self.end <= other.start || self.start >= other.end)
    }
}

/// Sorted, non-overlapping list of intervals.
///
/// Only [`merge`] builds one, so every set handed out is already normalized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntervalSet(Vec<Interval>);

impl IntervalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[Interval] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Interval> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<Interval> {
        self.0
    }

    /// Unique seconds covered by the set
    pub fn total_duration(&self) -> f64 {
        self.0.iter().map(Interval::len).sum()
    }

    /// Whether `t` falls inside one of the spans
    pub fn contains(&self, t: f64) -> bool {
        self.0.iter().any(|i| i.start <= t && t < i.end)
    }
}

impl FromIterator<Interval> for IntervalSet {
    fn from_iter<T: IntoIterator<Item = Interval>>(iter: T) -> Self {
        merge(iter)
    }
}

impl<'a> IntoIterator for &'a IntervalSet {
    type Item = &'a Interval;
    type IntoIter = std::slice::Iter<'a, Interval>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Merge overlapping and touching intervals into a normalized set
pub fn merge<I>(intervals: I) -> IntervalSet
where
    I: IntoIterator<Item = Interval>,
{
    let mut sorted: Vec<Interval> = intervals.into_iter().filter(|i| !i.is_empty()).collect();
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut merged: Vec<Interval> = Vec::with_capacity(sorted.len());
    for interval in sorted {
        match merged.last_mut() {
            Some(current) if interval.start <= current.end => {
                current.end = current.end.max(interval.end);
            }
            _ => merged.push(interval),
        }
    }

    IntervalSet(merged)
}

/// Remove every span already covered by `confirmed` from `pending`.
///
/// The pieces left over after one confirmed interval are carried on to the
/// next one, so the result never touches any confirmed span.
pub fn subtract_confirmed(pending: &IntervalSet, confirmed: &IntervalSet) -> IntervalSet {
    let mut remaining: Vec<Interval> = pending.0.clone();

    for c in confirmed {
        let mut next = Vec::with_capacity(remaining.len() + 1);
        for p in remaining {
            if !p.overlaps(c) {
                next.push(p);
                continue;
            }
            if p.start < c.start {
                next.extend(Interval::new(p.start, p.end.min(c.start)));
            }
            if p.end > c.end {
                next.extend(Interval::new(p.start.max(c.end), p.end));
            }
        }
        remaining = next;
    }

    merge(remaining)
}

/// Round to one decimal second, clip to `[0, duration]` and drop degenerate spans.
///
/// An unknown duration (absent, zero or non-finite) only clips at zero.
pub fn normalize_pending<'a, I>(pending: I, duration: Option<f64>) -> IntervalSet
where
    I: IntoIterator<Item = &'a Interval>,
{
    let upper = duration.filter(|d| d.is_finite() && *d > 0.0);

    let cleaned = pending.into_iter().filter_map(|i| {
        let mut start = round_tenth(i.start).max(0.0);
        let mut end = round_tenth(i.end).max(0.0);
        if let Some(d) = upper {
            start = start.min(d);
            end = end.min(d);
        }
        Interval::new(start, end)
    });

    merge(cleaned)
}

pub(crate) fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Format seconds as `mm:ss`; minutes keep counting past the hour
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!("{:02}:{:02}", total / 60, total % 60)
}
