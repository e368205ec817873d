use crate::model::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub booking_id: u64,
    pub span: Span,
}

/// Every booking held on one resource name, sorted by `span.start`.
///
/// This is an index over the bookings table. Entries whose booking has been
/// removed by a cascade may linger until pruned, so conflict checks take a
/// liveness predicate.
#[derive(Debug, Clone)]
pub struct Calendar {
    pub callsign: String,
    entries: Vec<Entry>,
}

impl Calendar {
    pub fn new(callsign: String) -> Self {
        Self { callsign, entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Insert maintaining sort order by start.
    pub fn insert(&mut self, booking_id: u64, span: Span) {
        let pos = self
            .entries
            .binary_search_by_key(&span.start, |e| e.span.start)
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, Entry { booking_id, span });
    }

    pub fn remove(&mut self, booking_id: u64) -> Option<Entry> {
        let pos = self.entries.iter().position(|e| e.booking_id == booking_id)?;
        Some(self.entries.remove(pos))
    }

    pub fn retain_live(&mut self, live: impl Fn(u64) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| live(e.booking_id));
        before - self.entries.len()
    }

    /// Entries whose span intersects `query`. Binary search skips everything
    /// starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Entry> {
        let right_bound = self.entries.partition_point(|e| e.span.start < query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |e| e.span.end > query.start)
    }

    /// First live booking intersecting `span`, ignoring `exclude` (the
    /// booking's own prior version during an update).
    pub fn find_conflict(
        &self,
        span: &Span,
        exclude: Option<u64>,
        live: impl Fn(u64) -> bool,
    ) -> Option<u64> {
        self.overlapping(span)
            .map(|e| e.booking_id)
            .find(|&id| Some(id) != exclude && live(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calendar(spans: &[(u64, i64, i64)]) -> Calendar {
        let mut cal = Calendar::new("KJFK_TWR".into());
        for &(id, start, end) in spans {
            cal.insert(id, Span::new(start, end));
        }
        cal
    }

    fn always(_: u64) -> bool {
        true
    }

    #[test]
    fn insert_keeps_start_order() {
        let cal = calendar(&[(1, 300, 400), (2, 100, 200), (3, 200, 300)]);
        let starts: Vec<_> = cal.entries().iter().map(|e| e.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn remove_missing_returns_none() {
        let mut cal = calendar(&[(1, 100, 200)]);
        assert!(cal.remove(99).is_none());
        assert_eq!(cal.remove(1).map(|e| e.booking_id), Some(1));
        assert!(cal.is_empty());
    }

    #[test]
    fn each_overlap_shape_conflicts() {
        let cal = calendar(&[(1, 1_000, 2_000)]);
        // starts inside
        assert_eq!(cal.find_conflict(&Span::new(1_500, 2_500), None, always), Some(1));
        // ends inside
        assert_eq!(cal.find_conflict(&Span::new(500, 1_500), None, always), Some(1));
        // contains existing
        assert_eq!(cal.find_conflict(&Span::new(500, 2_500), None, always), Some(1));
        // contained by existing
        assert_eq!(cal.find_conflict(&Span::new(1_200, 1_800), None, always), Some(1));
        // identical
        assert_eq!(cal.find_conflict(&Span::new(1_000, 2_000), None, always), Some(1));
    }

    #[test]
    fn touching_boundaries_do_not_conflict() {
        let cal = calendar(&[(1, 1_000, 2_000)]);
        assert_eq!(cal.find_conflict(&Span::new(2_000, 3_000), None, always), None);
        assert_eq!(cal.find_conflict(&Span::new(0, 1_000), None, always), None);
    }

    #[test]
    fn single_ms_overlap_conflicts() {
        let cal = calendar(&[(1, 100, 201)]);
        assert_eq!(cal.find_conflict(&Span::new(200, 300), None, always), Some(1));
    }

    #[test]
    fn excluded_booking_never_conflicts_with_itself() {
        let cal = calendar(&[(1, 1_000, 2_000), (2, 3_000, 4_000)]);
        assert_eq!(cal.find_conflict(&Span::new(1_000, 2_000), Some(1), always), None);
        assert_eq!(cal.find_conflict(&Span::new(1_500, 3_500), Some(1), always), Some(2));
    }

    #[test]
    fn dead_entries_are_ignored_and_pruned() {
        let mut cal = calendar(&[(1, 1_000, 2_000), (2, 5_000, 6_000)]);
        let live = |id: u64| id != 1;
        assert_eq!(cal.find_conflict(&Span::new(1_000, 2_000), None, live), None);
        assert_eq!(cal.retain_live(live), 1);
        assert_eq!(cal.len(), 1);
    }

    #[test]
    fn overlapping_skips_entries_outside_window() {
        let cal = calendar(&[(1, 100, 200), (2, 450, 600), (3, 1_000, 1_100)]);
        let hits: Vec<_> = cal.overlapping(&Span::new(500, 800)).map(|e| e.booking_id).collect();
        assert_eq!(hits, vec![2]);
    }

    #[test]
    fn long_booking_spanning_query_is_found() {
        let cal = calendar(&[(1, 0, 10_000), (2, 20_000, 30_000)]);
        let hits: Vec<_> = cal.overlapping(&Span::new(500, 600)).map(|e| e.booking_id).collect();
        assert_eq!(hits, vec![1]);
    }
}
