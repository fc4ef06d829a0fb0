use bitflags::bitflags;

bitflags! {
    /// Flags stored in the index header, fixed for the life of the index.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IndexFlags: u32 {
        const WITH_SECTION  = 0b001;
        const WITH_WEIGHT   = 0b010;
        const WITH_POSITION = 0b100;
    }
}

/// One posting: a term's occurrence in one `(record, section)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub rid: u32,
    pub sid: u32,
    pub tf: u32,
    pub weight: u32,
    pub positions: Vec<u32>,
}

impl Posting {
    pub fn new(rid: u32, sid: u32, positions: Vec<u32>) -> Self {
        Posting {
            rid,
            sid,
            tf: positions.len().max(1) as u32,
            weight: 0,
            positions,
        }
    }

    /// `tf == 0` marks a tombstone / deletion request.
    pub fn is_delete(&self) -> bool {
        self.tf == 0
    }
}

/// Caller-supplied request to add or remove one posting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSpec {
    pub rid: u32,
    pub sid: u32,
    pub weight: u32,
    pub positions: Vec<u32>,
}

impl UpdateSpec {
    pub fn insert(rid: u32, sid: u32, positions: Vec<u32>) -> Self {
        UpdateSpec {
            rid,
            sid,
            weight: 0,
            positions,
        }
    }

    pub fn delete(rid: u32, sid: u32) -> Self {
        UpdateSpec {
            rid,
            sid,
            weight: 0,
            positions: Vec::new(),
        }
    }

    pub fn is_delete(&self) -> bool {
        self.sid == 0 || self.positions.is_empty()
    }

    pub fn to_posting(&self, truncated_atf: u32) -> Posting {
        let tf = truncated_atf.max(1);
        Posting {
            rid: self.rid,
            sid: self.sid,
            tf,
            weight: self.weight,
            positions: self.positions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posting_tf_defaults_to_position_count() {
        let p = Posting::new(1, 1, vec![3, 7]);
        assert_eq!(p.tf, 2);
        assert!(!p.is_delete());
    }

    #[test]
    fn update_spec_delete_has_no_positions() {
        let u = UpdateSpec::delete(1, 2);
        assert!(u.is_delete());
    }

    #[test]
    fn update_spec_insert_is_not_delete() {
        let u = UpdateSpec::insert(1, 1, vec![0]);
        assert!(!u.is_delete());
    }
}
