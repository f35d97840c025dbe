use std::fmt;

/// How far a peer knows about one exported facet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStatus {
    /// the peer holds a reference and may send messages to it
    Reachable,
    /// the peer dropped its reference but may still compare against it
    Recognizable,
    None,
}

impl ExportStatus {
    fn from_char(c: char) -> Self {
        match c {
            'r' => ExportStatus::Reachable,
            's' => ExportStatus::Recognizable,
            _ => ExportStatus::None,
        }
    }

    fn as_char(self) -> char {
        match self {
            ExportStatus::Reachable => 'r',
            ExportStatus::Recognizable => 's',
            ExportStatus::None => 'n',
        }
    }

    pub fn is_recognizable(self) -> bool {
        self != ExportStatus::None
    }
}

/// Export status of every facet of one baseRef, persisted as `es.<baseRef>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExportStatuses(Vec<ExportStatus>);

impl ExportStatuses {
    pub fn parse(raw: Option<&str>, facets: usize) -> Self {
        let mut statuses: Vec<_> = raw
            .unwrap_or_default()
            .chars()
            .map(ExportStatus::from_char)
            .collect();
        if statuses.len() < facets {
            statuses.resize(facets, ExportStatus::None);
        }
        ExportStatuses(statuses)
    }

    pub fn get(&self, facet: usize) -> ExportStatus {
        self.0.get(facet).copied().unwrap_or(ExportStatus::None)
    }

    /// Facets past the parsed count are not ours to record.
    pub fn set(&mut self, facet: usize, status: ExportStatus) {
        match self.0.get_mut(facet) {
            Some(slot) => *slot = status,
            None => warn!("export status for facet {facet} of {} ignored", self.0.len()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, ExportStatus)> + '_ {
        self.0.iter().copied().enumerate()
    }

    pub fn any_reachable(&self) -> bool {
        self.0.contains(&ExportStatus::Reachable)
    }

    pub fn any_recognizable(&self) -> bool {
        self.0.iter().any(|s| s.is_recognizable())
    }

    /// `None` when nothing is left to persist.
    pub fn encode(&self) -> Option<String> {
        self.any_recognizable()
            .then(|| self.0.iter().map(|s| s.as_char()).collect())
    }
}

/// The four liveness legs of one baseRef.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Reachability {
    /// a userspace reference is resident
    pub local: bool,
    /// some facet is reachable by a peer
    pub exported: bool,
    /// some facet is at least recognizable by a peer
    pub recognizable: bool,
    /// references from other persisted state
    pub ref_count: u64,
}

impl Reachability {
    pub fn virtually_referenced(&self) -> bool {
        self.ref_count > 0
    }

    pub fn is_reclaimable(&self) -> bool {
        !self.local && !self.exported && !self.virtually_referenced()
    }
}

impl fmt::Display for Reachability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let leg = |set: bool, c: char| if set { c } else { '-' };
        write!(
            f,
            "{}{}{}{}",
            leg(self.local, 'L'),
            leg(self.exported, 'E'),
            leg(self.recognizable, 'R'),
            leg(self.virtually_referenced(), 'V'),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_pad_to_facet_count() {
        let mut es = ExportStatuses::parse(None, 2);
        assert_eq!(es.encode(), None);
        es.set(1, ExportStatus::Reachable);
        assert_eq!(es.encode().as_deref(), Some("nr"));
        es.set(1, ExportStatus::Recognizable);
        assert!(!es.any_reachable());
        assert!(es.any_recognizable());
        assert_eq!(ExportStatuses::parse(Some("s"), 3).encode().as_deref(), Some("snn"));
    }

    #[test]
    fn statuses_never_grow_past_the_facet_count() {
        let mut es = ExportStatuses::parse(None, 1);
        es.set(usize::MAX, ExportStatus::Reachable);
        es.set(1, ExportStatus::Reachable);
        assert_eq!(es.iter().count(), 1);
        assert_eq!(es.encode(), None);
    }

    #[test]
    fn legs_render_compactly() {
        let r = Reachability {
            local: true,
            exported: false,
            recognizable: true,
            ref_count: 2,
        };
        assert_eq!(r.to_string(), "L-RV");
        assert!(!r.is_reclaimable());
        assert!(Reachability::default().is_reclaimable());
    }
}
