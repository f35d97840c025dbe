//! Identity strings ("vrefs") as the vat and its peers see them.
//!
//! | form                 | meaning                                   |
//! | -------------------- | ----------------------------------------- |
//! | `o+12`               | ordinary object exported by this vat      |
//! | `o-7`                | object imported from a peer               |
//! | `o+v11/5`            | instance 5 of ephemeral virtual kind 11   |
//! | `o+d11/5`            | instance 5 of durable virtual kind 11     |
//! | `o+d11/5:1`          | facet 1 of a multi-facet durable instance |
//!
//! The part before `:` is the baseRef; every facet of a cohort shares it.

use std::fmt;

use crate::error::{VatError, VatResult};

pub type KindId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Export,
    Import,
    Virtual,
    Durable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VatSlot {
    pub kind: SlotKind,
    /// export/import number, or the kind ID for virtual objects
    pub id: u64,
    pub instance: Option<u64>,
    pub facet: Option<usize>,
    pub base_ref: String,
}

impl VatSlot {
    pub fn parse(vref: &str) -> VatResult<Self> {
        let bad = || VatError::integrity(format!("malformed vref {vref:?}"));
        let rest = vref.strip_prefix('o').ok_or_else(bad)?;
        let (allocated_by_vat, rest) = match rest.as_bytes().first() {
            Some(b'+') => (true, &rest[1..]),
            Some(b'-') => (false, &rest[1..]),
            _ => return Err(bad()),
        };
        let number = |s: &str| s.parse::<u64>().map_err(|_| bad());

        if !allocated_by_vat {
            return Ok(VatSlot {
                kind: SlotKind::Import,
                id: number(rest)?,
                instance: None,
                facet: None,
                base_ref: vref.to_owned(),
            });
        }

        let kind = match rest.as_bytes().first() {
            Some(b'v') => SlotKind::Virtual,
            Some(b'd') => SlotKind::Durable,
            _ => {
                return Ok(VatSlot {
                    kind: SlotKind::Export,
                    id: number(rest)?,
                    instance: None,
                    facet: None,
                    base_ref: vref.to_owned(),
                })
            }
        };
        let (kind_part, rest) = rest[1..].split_once('/').ok_or_else(bad)?;
        let (instance_part, facet) = match rest.split_once(':') {
            Some((i, f)) => (i, Some(f.parse::<usize>().map_err(|_| bad())?)),
            None => (rest, None),
        };
        let id = number(kind_part)?;
        let instance = number(instance_part)?;
        Ok(VatSlot {
            kind,
            id,
            instance: Some(instance),
            facet,
            base_ref: make_base_ref(id, instance, kind == SlotKind::Durable),
        })
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self.kind, SlotKind::Virtual | SlotKind::Durable)
    }

    /// Whether the identity survives an upgrade of this vat.
    pub fn is_durable(&self) -> bool {
        matches!(self.kind, SlotKind::Durable | SlotKind::Import)
    }

    pub fn is_import(&self) -> bool {
        self.kind == SlotKind::Import
    }
}

impl fmt::Display for VatSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_ref)?;
        if let Some(facet) = self.facet {
            write!(f, ":{facet}")?;
        }
        Ok(())
    }
}

pub fn make_base_ref(kind_id: KindId, instance: u64, durable: bool) -> String {
    let tag = if durable { 'd' } else { 'v' };
    format!("o+{tag}{kind_id}/{instance}")
}

pub fn make_facet_ref(base_ref: &str, facet: usize) -> String {
    format!("{base_ref}:{facet}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_form() {
        let s = VatSlot::parse("o+d11/5:1").unwrap();
        assert_eq!(s.kind, SlotKind::Durable);
        assert_eq!((s.id, s.instance, s.facet), (11, Some(5), Some(1)));
        assert_eq!(s.base_ref, "o+d11/5");
        assert_eq!(s.to_string(), "o+d11/5:1");

        let s = VatSlot::parse("o+v3/9").unwrap();
        assert!(s.is_virtual() && !s.is_durable());
        assert_eq!(s.facet, None);

        let s = VatSlot::parse("o-4").unwrap();
        assert!(s.is_import() && s.is_durable());

        let s = VatSlot::parse("o+12").unwrap();
        assert_eq!((s.kind, s.id), (SlotKind::Export, 12));
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "p+5", "o", "o+vx/1", "o+v1", "o+d1/2:z", "o-"] {
            assert!(VatSlot::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn facet_refs_share_a_base() {
        let base = make_base_ref(11, 2, false);
        let facet = VatSlot::parse(&make_facet_ref(&base, 3)).unwrap();
        assert_eq!(facet.base_ref, base);
        assert_eq!(facet.facet, Some(3));
        assert_eq!(VatSlot::parse(&base).unwrap().facet, None);
    }
}
