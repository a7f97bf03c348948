//! Closed table of hierarchy links.
//!
//! Each entry is keyed by `(parent type, child type)` and holds the mapping
//! property name plus typed accessors for the link field on the child. All
//! link create / delete / can-create dispatch goes through this table.

use crate::unit::{LinkRef, StatUnit, UnitType};

/// One parent/child link kind.
pub struct LinkSpec {
    pub parent: UnitType,
    pub child: UnitType,
    /// Mapping target name of the link property on the child.
    pub field: &'static str,
    get: fn(&StatUnit) -> Option<&LinkRef>,
    set: fn(&mut StatUnit, Option<LinkRef>),
}

impl LinkSpec {
    pub fn get<'a>(&self, child: &'a StatUnit) -> Option<&'a LinkRef> {
        (self.get)(child)
    }

    /// Point `child` at `parent`.
    pub fn create(&self, child: &mut StatUnit, parent: LinkRef) {
        (self.set)(child, Some(parent));
    }

    pub fn delete(&self, child: &mut StatUnit) {
        (self.set)(child, None);
    }

    /// A link can be created when both units have the right type, neither
    /// is deleted, and the child is not already linked to a different
    /// persisted parent.
    pub fn can_create(&self, parent: &StatUnit, child: &StatUnit) -> bool {
        if parent.unit_type != self.parent || child.unit_type != self.child {
            return false;
        }
        if parent.is_deleted || child.is_deleted {
            return false;
        }
        match self.get(child).and_then(LinkRef::reg_id) {
            Some(existing) => parent.reg_id != 0 && existing == parent.reg_id,
            None => true,
        }
    }
}

impl std::fmt::Debug for LinkSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkSpec")
            .field("parent", &self.parent)
            .field("child", &self.child)
            .field("field", &self.field)
            .finish()
    }
}

fn get_legal_unit(u: &StatUnit) -> Option<&LinkRef> {
    u.legal_unit.as_ref()
}

fn set_legal_unit(u: &mut StatUnit, link: Option<LinkRef>) {
    u.legal_unit = link;
}

fn get_enterprise_unit(u: &StatUnit) -> Option<&LinkRef> {
    u.enterprise_unit.as_ref()
}

fn set_enterprise_unit(u: &mut StatUnit, link: Option<LinkRef>) {
    u.enterprise_unit = link;
}

fn get_ent_group(u: &StatUnit) -> Option<&LinkRef> {
    u.ent_group.as_ref()
}

fn set_ent_group(u: &mut StatUnit, link: Option<LinkRef>) {
    u.ent_group = link;
}

pub static LINKS: [LinkSpec; 3] = [
    LinkSpec {
        parent: UnitType::LegalUnit,
        child: UnitType::LocalUnit,
        field: "LegalUnitId",
        get: get_legal_unit,
        set: set_legal_unit,
    },
    LinkSpec {
        parent: UnitType::EnterpriseUnit,
        child: UnitType::LegalUnit,
        field: "EnterpriseUnitRegId",
        get: get_enterprise_unit,
        set: set_enterprise_unit,
    },
    LinkSpec {
        parent: UnitType::EnterpriseGroup,
        child: UnitType::EnterpriseUnit,
        field: "EntGroupId",
        get: get_ent_group,
        set: set_ent_group,
    },
];

pub fn link_spec(parent: UnitType, child: UnitType) -> Option<&'static LinkSpec> {
    LINKS.iter().find(|s| s.parent == parent && s.child == child)
}

/// The upward link carried by units of type `child`.
pub fn upward_link(child: UnitType) -> Option<&'static LinkSpec> {
    LINKS.iter().find(|s| s.child == child)
}

/// The link whose mapping property is `field`.
pub fn link_for_field(field: &str) -> Option<&'static LinkSpec> {
    LINKS.iter().find(|s| s.field == field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn unit(t: UnitType, reg_id: i64) -> StatUnit {
        let mut u = StatUnit::new(t, Utc::now());
        u.reg_id = reg_id;
        u
    }

    #[test]
    fn table_covers_every_level_once() {
        for t in UnitType::FLUSH_ORDER {
            let expected = t.parent().is_some();
            assert_eq!(upward_link(t).is_some(), expected, "{t}");
        }
        assert!(link_spec(UnitType::EnterpriseGroup, UnitType::LocalUnit).is_none());
    }

    #[test]
    fn create_and_delete_use_typed_field() {
        let spec = link_for_field("EnterpriseUnitRegId").unwrap();
        let mut legal = unit(UnitType::LegalUnit, 2);
        spec.create(&mut legal, LinkRef::RegId(30));
        assert_eq!(legal.enterprise_unit, Some(LinkRef::RegId(30)));
        spec.delete(&mut legal);
        assert!(legal.enterprise_unit.is_none());
    }

    #[test]
    fn can_create_rejects_foreign_parent() {
        let spec = link_spec(UnitType::LegalUnit, UnitType::LocalUnit).unwrap();
        let legal = unit(UnitType::LegalUnit, 5);
        let mut local = unit(UnitType::LocalUnit, 6);
        assert!(spec.can_create(&legal, &local));

        local.legal_unit = Some(LinkRef::RegId(99));
        assert!(!spec.can_create(&legal, &local));

        local.legal_unit = Some(LinkRef::RegId(5));
        assert!(spec.can_create(&legal, &local));

        let enterprise = unit(UnitType::EnterpriseUnit, 7);
        assert!(!spec.can_create(&enterprise, &local));
    }
}
