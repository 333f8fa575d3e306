// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Schema and data graph held by the in-memory server
//!
//! One [`Graph`] per database holds committed state; every transaction works
//! on its own clone and writes it back on commit.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

use super::error::{MemoryError, MemoryResult};
use crate::concept::{Annotation, Label, TypeKind, Value, ValueType};
use crate::protocol::request::hex;
use crate::protocol::{ThingRecord, TypeRecord};

#[derive(Debug, Clone, PartialEq)]
struct Ownership {
    attribute: Label,
    overridden: Option<Label>,
    annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, PartialEq)]
struct Playing {
    role: Label,
    overridden: Option<Label>,
}

#[derive(Debug, Clone)]
struct TypeDef {
    label: Label,
    kind: TypeKind,
    supertype: Option<Label>,
    is_root: bool,
    is_abstract: bool,
    value_type: ValueType,
    owns: Vec<Ownership>,
    plays: Vec<Playing>,
    regex: Option<String>,
}

impl TypeDef {
    fn root(kind: TypeKind) -> Self {
        let supertype = match kind {
            TypeKind::Thing | TypeKind::Role => None,
            _ => Some(TypeKind::Thing.root_label()),
        };
        Self {
            label: kind.root_label(),
            kind,
            supertype,
            is_root: true,
            is_abstract: true,
            value_type: ValueType::Object,
            owns: Vec::new(),
            plays: Vec::new(),
            regex: None,
        }
    }

    fn new(label: Label, kind: TypeKind, supertype: Label, value_type: ValueType) -> Self {
        Self {
            label,
            kind,
            supertype: Some(supertype),
            is_root: false,
            is_abstract: false,
            value_type,
            owns: Vec::new(),
            plays: Vec::new(),
            regex: None,
        }
    }

    fn record(&self) -> TypeRecord {
        TypeRecord {
            label: self.label.name().to_string(),
            scope: self.label.scope().map(str::to_string),
            encoding: self.kind.encoding(),
            is_root: self.is_root,
            is_abstract: self.is_abstract,
            value_type: self.value_type.code(),
        }
    }

    fn ensure_not_root(&self) -> MemoryResult<()> {
        if self.is_root {
            Err(MemoryError::RootType(self.label.clone()))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone)]
struct ThingDef {
    iid: Vec<u8>,
    type_label: Label,
    value: Option<Value>,
    has: Vec<Vec<u8>>,
    players: Vec<(Label, Vec<u8>)>,
}

fn satisfies(held: &[Annotation], wanted: &[Annotation]) -> bool {
    wanted.iter().all(|annotation| {
        held.contains(annotation)
            || (*annotation == Annotation::Unique && held.contains(&Annotation::Key))
    })
}

fn push_unique(labels: &mut Vec<Label>, label: Label) {
    if !labels.contains(&label) {
        labels.push(label);
    }
}

#[derive(Debug, Clone)]
pub struct Graph {
    types: BTreeMap<Label, TypeDef>,
    things: BTreeMap<Vec<u8>, ThingDef>,
    next_iid: u64,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        let mut types = BTreeMap::new();
        for kind in [
            TypeKind::Thing,
            TypeKind::Entity,
            TypeKind::Relation,
            TypeKind::Attribute,
            TypeKind::Role,
        ] {
            let root = TypeDef::root(kind);
            types.insert(root.label.clone(), root);
        }
        Self {
            types,
            things: BTreeMap::new(),
            next_iid: 1,
        }
    }

    fn ty(&self, label: &Label) -> MemoryResult<&TypeDef> {
        self.types
            .get(label)
            .ok_or_else(|| MemoryError::TypeNotFound(label.clone()))
    }

    fn ty_mut(&mut self, label: &Label) -> MemoryResult<&mut TypeDef> {
        self.types
            .get_mut(label)
            .ok_or_else(|| MemoryError::TypeNotFound(label.clone()))
    }

    fn ty_of(&self, label: &Label, kind: TypeKind) -> MemoryResult<&TypeDef> {
        let def = self.ty(label)?;
        if def.kind != kind {
            return Err(MemoryError::WrongKind {
                label: label.clone(),
                expected: kind,
            });
        }
        Ok(def)
    }

    fn thing_type_def(&self, label: &Label) -> MemoryResult<&TypeDef> {
        let def = self.ty(label)?;
        if def.kind == TypeKind::Role {
            return Err(MemoryError::WrongKind {
                label: label.clone(),
                expected: TypeKind::Thing,
            });
        }
        Ok(def)
    }

    fn thing(&self, iid: &[u8]) -> MemoryResult<&ThingDef> {
        self.things
            .get(iid)
            .ok_or_else(|| MemoryError::ThingNotFound(hex(iid)))
    }

    fn thing_mut(&mut self, iid: &[u8]) -> MemoryResult<&mut ThingDef> {
        self.things
            .get_mut(iid)
            .ok_or_else(|| MemoryError::ThingNotFound(hex(iid)))
    }

    fn thing_kind(&self, thing: &ThingDef) -> MemoryResult<TypeKind> {
        Ok(self.ty(&thing.type_label)?.kind)
    }

    fn thing_record(&self, thing: &ThingDef) -> MemoryResult<ThingRecord> {
        Ok(ThingRecord {
            iid: thing.iid.clone(),
            thing_type: self.ty(&thing.type_label)?.record(),
            value: thing.value.as_ref().map(Value::to_record),
            inferred: false,
        })
    }

    fn thing_records<'a>(
        &self,
        things: impl IntoIterator<Item = &'a ThingDef>,
    ) -> MemoryResult<Vec<ThingRecord>> {
        things
            .into_iter()
            .map(|thing| self.thing_record(thing))
            .collect()
    }

    fn type_records(&self, labels: &[Label]) -> MemoryResult<Vec<TypeRecord>> {
        labels
            .iter()
            .map(|label| self.ty(label).map(TypeDef::record))
            .collect()
    }

    /// Strict ancestors, nearest first
    fn supertypes_of(&self, label: &Label) -> Vec<Label> {
        let mut result = Vec::new();
        let mut current = self.types.get(label).and_then(|def| def.supertype.clone());
        while let Some(parent) = current {
            if result.contains(&parent) {
                break;
            }
            current = self.types.get(&parent).and_then(|def| def.supertype.clone());
            result.push(parent);
        }
        result
    }

    fn is_subtype_of(&self, label: &Label, ancestor: &Label) -> bool {
        label == ancestor || self.supertypes_of(label).contains(ancestor)
    }

    fn children(&self, label: &Label) -> Vec<Label> {
        self.types
            .values()
            .filter(|def| def.supertype.as_ref() == Some(label))
            .map(|def| def.label.clone())
            .collect()
    }

    /// The type itself followed by all transitive subtypes
    fn subtypes_of(&self, label: &Label) -> Vec<Label> {
        let mut result = vec![label.clone()];
        let mut index = 0;
        while index < result.len() {
            for child in self.children(&result[index]) {
                push_unique(&mut result, child);
            }
            index += 1;
        }
        result
    }

    // -- lookups ------------------------------------------------------------

    /// Non-role type by unscoped label
    pub fn get_thing_type(&self, name: &str) -> Option<TypeRecord> {
        self.types
            .get(&Label::new(name))
            .filter(|def| def.kind != TypeKind::Role)
            .map(TypeDef::record)
    }

    pub fn get_thing(&self, iid: &[u8]) -> MemoryResult<Option<ThingRecord>> {
        self.things
            .get(iid)
            .map(|thing| self.thing_record(thing))
            .transpose()
    }

    pub fn put_type(
        &mut self,
        name: &str,
        kind: TypeKind,
        value_type: ValueType,
    ) -> MemoryResult<TypeRecord> {
        let label = Label::new(name);
        if let Some(existing) = self.types.get(&label) {
            if existing.kind != kind {
                return Err(MemoryError::WrongKind {
                    label,
                    expected: kind,
                });
            }
            if kind == TypeKind::Attribute && existing.value_type != value_type {
                return Err(MemoryError::InvalidSchema(format!(
                    "attribute type '{}' already exists with value type {}",
                    label, existing.value_type
                )));
            }
            return Ok(existing.record());
        }

        let def = TypeDef::new(label.clone(), kind, kind.root_label(), value_type);
        let record = def.record();
        self.types.insert(label, def);
        Ok(record)
    }

    // -- type hierarchy -----------------------------------------------------

    pub fn get_supertype(&self, label: &Label) -> MemoryResult<Option<TypeRecord>> {
        let def = self.ty(label)?;
        match &def.supertype {
            Some(parent) => Ok(Some(self.ty(parent)?.record())),
            None => Ok(None),
        }
    }

    pub fn get_supertypes(&self, label: &Label) -> MemoryResult<Vec<TypeRecord>> {
        self.ty(label)?;
        self.type_records(&self.supertypes_of(label))
    }

    pub fn get_subtypes(&self, label: &Label, explicit: bool) -> MemoryResult<Vec<TypeRecord>> {
        self.ty(label)?;
        let labels = if explicit {
            self.children(label)
        } else {
            self.subtypes_of(label)
        };
        self.type_records(&labels)
    }

    pub fn set_supertype(&mut self, label: &Label, supertype: &Label) -> MemoryResult<()> {
        let def = self.ty(label)?;
        def.ensure_not_root()?;
        let parent = self.ty(supertype)?;
        if parent.kind != def.kind {
            return Err(MemoryError::WrongKind {
                label: supertype.clone(),
                expected: def.kind,
            });
        }
        if self.is_subtype_of(supertype, label) {
            return Err(MemoryError::InvalidSchema(format!(
                "'{}' cannot be a supertype of its own supertype '{}'",
                label, supertype
            )));
        }
        if def.kind == TypeKind::Attribute
            && !parent.is_root
            && parent.value_type != def.value_type
        {
            return Err(MemoryError::InvalidSchema(format!(
                "'{}' holds {} values but '{}' holds {} values",
                label, def.value_type, supertype, parent.value_type
            )));
        }
        self.ty_mut(label)?.supertype = Some(supertype.clone());
        Ok(())
    }

    pub fn set_abstract(&mut self, label: &Label, is_abstract: bool) -> MemoryResult<()> {
        self.ty(label)?.ensure_not_root()?;
        if is_abstract && self.things.values().any(|t| &t.type_label == label) {
            return Err(MemoryError::InvalidSchema(format!(
                "'{}' has instances and cannot be abstract",
                label
            )));
        }
        self.ty_mut(label)?.is_abstract = is_abstract;
        Ok(())
    }

    pub fn set_label(&mut self, label: &Label, name: &str) -> MemoryResult<Label> {
        self.ty(label)?.ensure_not_root()?;
        let renamed = label.renamed(name);
        if self.types.contains_key(&renamed) {
            return Err(MemoryError::InvalidSchema(format!(
                "label '{}' is already in use",
                renamed
            )));
        }
        self.relabel(label, &renamed);
        Ok(renamed)
    }

    fn relabel(&mut self, old: &Label, new: &Label) {
        let Some(mut def) = self.types.remove(old) else {
            return;
        };
        def.label = new.clone();
        let kind = def.kind;
        self.types.insert(new.clone(), def);

        let rename = |label: &mut Label| {
            if label == old {
                *label = new.clone();
            }
        };
        for def in self.types.values_mut() {
            if let Some(supertype) = def.supertype.as_mut() {
                rename(supertype);
            }
            for owns in def.owns.iter_mut() {
                rename(&mut owns.attribute);
                if let Some(overridden) = owns.overridden.as_mut() {
                    rename(overridden);
                }
            }
            for plays in def.plays.iter_mut() {
                rename(&mut plays.role);
                if let Some(overridden) = plays.overridden.as_mut() {
                    rename(overridden);
                }
            }
        }
        for thing in self.things.values_mut() {
            rename(&mut thing.type_label);
            for (role, _) in thing.players.iter_mut() {
                rename(role);
            }
        }

        if kind == TypeKind::Relation {
            let roles: Vec<Label> = self
                .types
                .keys()
                .filter(|role| role.scope() == Some(old.name()))
                .cloned()
                .collect();
            for role in roles {
                self.relabel(&role, &Label::scoped(new.name(), role.name()));
            }
        }
    }

    pub fn delete_type(&mut self, label: &Label) -> MemoryResult<()> {
        let def = self.ty(label)?;
        def.ensure_not_root()?;
        let kind = def.kind;
        if !self.children(label).is_empty() {
            return Err(MemoryError::InvalidSchema(format!(
                "'{}' has subtypes and cannot be deleted",
                label
            )));
        }
        if self.things.values().any(|t| &t.type_label == label) {
            return Err(MemoryError::InvalidSchema(format!(
                "'{}' has instances and cannot be deleted",
                label
            )));
        }

        let mut removed = vec![label.clone()];
        if kind == TypeKind::Relation {
            removed.extend(
                self.types
                    .keys()
                    .filter(|role| role.scope() == Some(label.name()))
                    .cloned(),
            );
        }
        for gone in &removed {
            self.types.remove(gone);
        }
        for def in self.types.values_mut() {
            def.owns.retain(|o| !removed.contains(&o.attribute));
            def.plays.retain(|p| !removed.contains(&p.role));
        }
        Ok(())
    }

    // -- ownership ----------------------------------------------------------

    fn owns_entries(&self, label: &Label, explicit: bool) -> MemoryResult<Vec<Ownership>> {
        let def = self.thing_type_def(label)?;
        if explicit {
            return Ok(def.owns.clone());
        }
        let mut result: Vec<Ownership> = Vec::new();
        let mut hidden = BTreeSet::new();
        for current in std::iter::once(label.clone()).chain(self.supertypes_of(label)) {
            for owns in &self.ty(&current)?.owns {
                if hidden.contains(&owns.attribute)
                    || result.iter().any(|o| o.attribute == owns.attribute)
                {
                    continue;
                }
                if let Some(overridden) = &owns.overridden {
                    hidden.insert(overridden.clone());
                }
                result.push(owns.clone());
            }
        }
        Ok(result)
    }

    pub fn get_owns(
        &self,
        label: &Label,
        value_type: Option<ValueType>,
        annotations: &[Annotation],
        explicit: bool,
    ) -> MemoryResult<Vec<TypeRecord>> {
        let mut records = Vec::new();
        for owns in self.owns_entries(label, explicit)? {
            let attribute = self.ty(&owns.attribute)?;
            if value_type.map_or(true, |vt| vt == attribute.value_type)
                && satisfies(&owns.annotations, annotations)
            {
                records.push(attribute.record());
            }
        }
        Ok(records)
    }

    pub fn set_owns(
        &mut self,
        owner: &Label,
        attribute: &Label,
        overridden: Option<&Label>,
        annotations: &[Annotation],
    ) -> MemoryResult<()> {
        self.thing_type_def(owner)?.ensure_not_root()?;
        let attribute_def = self.ty_of(attribute, TypeKind::Attribute)?;
        if annotations.contains(&Annotation::Key) && !attribute_def.value_type.is_keyable() {
            return Err(MemoryError::InvalidSchema(format!(
                "'{}' holds {} values, which cannot be keys",
                attribute, attribute_def.value_type
            )));
        }
        if let Some(overridden) = overridden {
            self.ty_of(overridden, TypeKind::Attribute)?;
            if attribute == overridden || !self.is_subtype_of(attribute, overridden) {
                return Err(MemoryError::InvalidSchema(format!(
                    "'{}' is not a subtype of '{}'",
                    attribute, overridden
                )));
            }
            if !self.inherits_owns(owner, overridden)? {
                return Err(MemoryError::InvalidSchema(format!(
                    "'{}' does not inherit ownership of '{}'",
                    owner, overridden
                )));
            }
        }

        let entry = Ownership {
            attribute: attribute.clone(),
            overridden: overridden.cloned(),
            annotations: annotations.to_vec(),
        };
        let def = self.ty_mut(owner)?;
        match def.owns.iter_mut().find(|o| &o.attribute == attribute) {
            Some(existing) => *existing = entry,
            None => def.owns.push(entry),
        }
        Ok(())
    }

    fn inherits_owns(&self, owner: &Label, attribute: &Label) -> MemoryResult<bool> {
        match self.ty(owner)?.supertype.clone() {
            Some(parent) => Ok(self
                .owns_entries(&parent, false)?
                .iter()
                .any(|o| &o.attribute == attribute)),
            None => Ok(false),
        }
    }

    pub fn unset_owns(&mut self, owner: &Label, attribute: &Label) -> MemoryResult<()> {
        let def = self.thing_type_def(owner)?;
        def.ensure_not_root()?;
        if !def.owns.iter().any(|o| &o.attribute == attribute) {
            return Err(MemoryError::InvalidSchema(format!(
                "'{}' does not own '{}'",
                owner, attribute
            )));
        }
        let owners = self.subtypes_of(owner);
        let attribute_types = self.subtypes_of(attribute);
        let in_use = self
            .things
            .values()
            .filter(|t| owners.contains(&t.type_label))
            .flat_map(|t| t.has.iter())
            .filter_map(|iid| self.things.get(iid))
            .any(|a| attribute_types.contains(&a.type_label));
        if in_use {
            return Err(MemoryError::InvalidSchema(format!(
                "instances of '{}' still own '{}' attributes",
                owner, attribute
            )));
        }
        self.ty_mut(owner)?.owns.retain(|o| &o.attribute != attribute);
        Ok(())
    }

    pub fn get_owns_overridden(
        &self,
        owner: &Label,
        attribute: &Label,
    ) -> MemoryResult<Option<TypeRecord>> {
        let entries = self.owns_entries(owner, false)?;
        match entries
            .iter()
            .find(|o| &o.attribute == attribute)
            .and_then(|o| o.overridden.as_ref())
        {
            Some(overridden) => Ok(Some(self.ty(overridden)?.record())),
            None => Ok(None),
        }
    }

    /// Ownership entry on `owner` covering attributes of `attribute_type`
    fn ownership_for(
        &self,
        owner: &Label,
        attribute_type: &Label,
    ) -> MemoryResult<Option<Ownership>> {
        Ok(self
            .owns_entries(owner, false)?
            .into_iter()
            .find(|o| self.is_subtype_of(attribute_type, &o.attribute)))
    }

    pub fn attribute_owners(
        &self,
        attribute: &Label,
        annotations: &[Annotation],
    ) -> MemoryResult<Vec<TypeRecord>> {
        self.ty_of(attribute, TypeKind::Attribute)?;
        let mut records = Vec::new();
        for def in self.types.values() {
            if def.kind == TypeKind::Role {
                continue;
            }
            let owned = self
                .owns_entries(&def.label, false)?
                .into_iter()
                .any(|o| &o.attribute == attribute && satisfies(&o.annotations, annotations));
            if owned {
                records.push(def.record());
            }
        }
        Ok(records)
    }

    // -- playing ------------------------------------------------------------

    fn plays_entries(&self, label: &Label, explicit: bool) -> MemoryResult<Vec<Playing>> {
        let def = self.thing_type_def(label)?;
        if explicit {
            return Ok(def.plays.clone());
        }
        let mut result: Vec<Playing> = Vec::new();
        let mut hidden = BTreeSet::new();
        for current in std::iter::once(label.clone()).chain(self.supertypes_of(label)) {
            for plays in &self.ty(&current)?.plays {
                if hidden.contains(&plays.role) || result.iter().any(|p| p.role == plays.role) {
                    continue;
                }
                if let Some(overridden) = &plays.overridden {
                    hidden.insert(overridden.clone());
                }
                result.push(plays.clone());
            }
        }
        Ok(result)
    }

    pub fn get_plays(&self, label: &Label, explicit: bool) -> MemoryResult<Vec<TypeRecord>> {
        let roles: Vec<Label> = self
            .plays_entries(label, explicit)?
            .into_iter()
            .map(|p| p.role)
            .collect();
        self.type_records(&roles)
    }

    pub fn set_plays(
        &mut self,
        player: &Label,
        role: &Label,
        overridden: Option<&Label>,
    ) -> MemoryResult<()> {
        self.thing_type_def(player)?.ensure_not_root()?;
        self.ty_of(role, TypeKind::Role)?;
        if let Some(overridden) = overridden {
            self.ty_of(overridden, TypeKind::Role)?;
            if role == overridden || !self.is_subtype_of(role, overridden) {
                return Err(MemoryError::InvalidSchema(format!(
                    "'{}' is not a subtype of '{}'",
                    role, overridden
                )));
            }
            let inherited = match self.ty(player)?.supertype.clone() {
                Some(parent) => self
                    .plays_entries(&parent, false)?
                    .iter()
                    .any(|p| &p.role == overridden),
                None => false,
            };
            if !inherited {
                return Err(MemoryError::InvalidSchema(format!(
                    "'{}' does not inherit '{}'",
                    player, overridden
                )));
            }
        }

        let entry = Playing {
            role: role.clone(),
            overridden: overridden.cloned(),
        };
        let def = self.ty_mut(player)?;
        match def.plays.iter_mut().find(|p| &p.role == role) {
            Some(existing) => *existing = entry,
            None => def.plays.push(entry),
        }
        Ok(())
    }

    pub fn unset_plays(&mut self, player: &Label, role: &Label) -> MemoryResult<()> {
        let def = self.thing_type_def(player)?;
        def.ensure_not_root()?;
        if !def.plays.iter().any(|p| &p.role == role) {
            return Err(MemoryError::InvalidSchema(format!(
                "'{}' does not play '{}'",
                player, role
            )));
        }
        self.ty_mut(player)?.plays.retain(|p| &p.role != role);
        Ok(())
    }

    pub fn get_plays_overridden(
        &self,
        player: &Label,
        role: &Label,
    ) -> MemoryResult<Option<TypeRecord>> {
        let entries = self.plays_entries(player, false)?;
        match entries
            .iter()
            .find(|p| &p.role == role)
            .and_then(|p| p.overridden.as_ref())
        {
            Some(overridden) => Ok(Some(self.ty(overridden)?.record())),
            None => Ok(None),
        }
    }

    // -- relates ------------------------------------------------------------

    fn declared_roles(&self, relation: &Label) -> Vec<Label> {
        self.types
            .values()
            .filter(|def| def.kind == TypeKind::Role && def.label.scope() == Some(relation.name()))
            .map(|def| def.label.clone())
            .collect()
    }

    fn relates_labels(&self, relation: &Label) -> MemoryResult<Vec<Label>> {
        let def = self.ty_of(relation, TypeKind::Relation)?;
        if def.is_root {
            return Ok(self.declared_roles(relation));
        }
        let mut result = Vec::new();
        let mut hidden = BTreeSet::new();
        let lineage = std::iter::once(relation.clone()).chain(self.supertypes_of(relation));
        for current in lineage {
            if self.ty(&current)?.is_root {
                break;
            }
            for role in self.declared_roles(&current) {
                if hidden.contains(&role) {
                    continue;
                }
                if let Some(parent) = &self.ty(&role)?.supertype {
                    hidden.insert(parent.clone());
                }
                push_unique(&mut result, role);
            }
        }
        Ok(result)
    }

    pub fn get_relates(&self, relation: &Label) -> MemoryResult<Vec<TypeRecord>> {
        let roles = self.relates_labels(relation)?;
        self.type_records(&roles)
    }

    pub fn get_relates_for_role_label(
        &self,
        relation: &Label,
        role_name: &str,
    ) -> MemoryResult<Option<TypeRecord>> {
        match self
            .relates_labels(relation)?
            .into_iter()
            .find(|role| role.name() == role_name)
        {
            Some(role) => Ok(Some(self.ty(&role)?.record())),
            None => Ok(None),
        }
    }

    pub fn set_relates(
        &mut self,
        relation: &Label,
        role_name: &str,
        overridden: Option<&str>,
    ) -> MemoryResult<()> {
        self.ty_of(relation, TypeKind::Relation)?.ensure_not_root()?;
        let supertype = match overridden {
            None => TypeKind::Role.root_label(),
            Some(name) => {
                let parent = self.ty(relation)?.supertype.clone();
                let inherited = match parent {
                    Some(parent) => self
                        .relates_labels(&parent)?
                        .into_iter()
                        .find(|role| role.name() == name),
                    None => None,
                };
                inherited.ok_or_else(|| {
                    MemoryError::InvalidSchema(format!(
                        "'{}' does not inherit a role named '{}'",
                        relation, name
                    ))
                })?
            }
        };

        let role = Label::scoped(relation.name(), role_name);
        match self.types.get_mut(&role) {
            Some(existing) => existing.supertype = Some(supertype),
            None => {
                let def = TypeDef::new(role.clone(), TypeKind::Role, supertype, ValueType::Object);
                self.types.insert(role, def);
            }
        }
        Ok(())
    }

    pub fn unset_relates(&mut self, relation: &Label, role_name: &str) -> MemoryResult<()> {
        self.ty_of(relation, TypeKind::Relation)?.ensure_not_root()?;
        let role = Label::scoped(relation.name(), role_name);
        self.ty_of(&role, TypeKind::Role)?;
        if !self.children(&role).is_empty() {
            return Err(MemoryError::InvalidSchema(format!(
                "role '{}' is overridden and cannot be removed",
                role
            )));
        }
        if self
            .things
            .values()
            .any(|t| t.players.iter().any(|(r, _)| r == &role))
        {
            return Err(MemoryError::InvalidSchema(format!(
                "role '{}' has players and cannot be removed",
                role
            )));
        }
        self.types.remove(&role);
        for def in self.types.values_mut() {
            def.plays.retain(|p| p.role != role);
        }
        Ok(())
    }

    // -- roles --------------------------------------------------------------

    pub fn role_relation_types(&self, role: &Label) -> MemoryResult<Vec<TypeRecord>> {
        self.ty_of(role, TypeKind::Role)?;
        let mut records = Vec::new();
        for def in self.types.values().filter(|d| d.kind == TypeKind::Relation) {
            if self.relates_labels(&def.label)?.contains(role) {
                records.push(def.record());
            }
        }
        Ok(records)
    }

    pub fn role_player_types(&self, role: &Label) -> MemoryResult<Vec<TypeRecord>> {
        self.ty_of(role, TypeKind::Role)?;
        let mut records = Vec::new();
        for def in self.types.values().filter(|d| d.kind != TypeKind::Role) {
            if self
                .plays_entries(&def.label, false)?
                .iter()
                .any(|p| &p.role == role)
            {
                records.push(def.record());
            }
        }
        Ok(records)
    }

    pub fn role_relation_instances(&self, role: &Label) -> MemoryResult<Vec<ThingRecord>> {
        self.ty_of(role, TypeKind::Role)?;
        let roles = self.subtypes_of(role);
        self.thing_records(
            self.things
                .values()
                .filter(|t| t.players.iter().any(|(r, _)| roles.contains(r))),
        )
    }

    pub fn role_player_instances(&self, role: &Label) -> MemoryResult<Vec<ThingRecord>> {
        self.ty_of(role, TypeKind::Role)?;
        let roles = self.subtypes_of(role);
        let mut players: Vec<Vec<u8>> = Vec::new();
        for relation in self.things.values() {
            for (r, player) in &relation.players {
                if roles.contains(r) && !players.contains(player) {
                    players.push(player.clone());
                }
            }
        }
        players
            .iter()
            .map(|iid| self.thing(iid).and_then(|t| self.thing_record(t)))
            .collect()
    }

    // -- instances ----------------------------------------------------------

    pub fn get_instances(&self, label: &Label, explicit: bool) -> MemoryResult<Vec<ThingRecord>> {
        self.thing_type_def(label)?;
        let types = if explicit {
            vec![label.clone()]
        } else {
            self.subtypes_of(label)
        };
        self.thing_records(
            self.things
                .values()
                .filter(|t| types.contains(&t.type_label)),
        )
    }

    fn allocate(&mut self, type_label: Label, kind: TypeKind, value: Option<Value>) -> ThingDef {
        let mut iid = vec![kind.encoding() as u8];
        iid.extend_from_slice(&self.next_iid.to_be_bytes());
        self.next_iid += 1;
        let thing = ThingDef {
            iid: iid.clone(),
            type_label,
            value,
            has: Vec::new(),
            players: Vec::new(),
        };
        self.things.insert(iid, thing.clone());
        thing
    }

    pub fn create(&mut self, label: &Label, kind: TypeKind) -> MemoryResult<ThingRecord> {
        let def = self.ty_of(label, kind)?;
        if def.is_abstract {
            return Err(MemoryError::InvalidData(format!(
                "cannot create instances of abstract type '{}'",
                label
            )));
        }
        let thing = self.allocate(label.clone(), kind, None);
        self.thing_record(&thing)
    }

    fn check_attribute_value(&self, label: &Label, value: &Value) -> MemoryResult<()> {
        let def = self.ty_of(label, TypeKind::Attribute)?;
        if value.value_type() != def.value_type {
            return Err(MemoryError::InvalidData(format!(
                "'{}' holds {} values, got {}",
                label,
                def.value_type,
                value.value_type()
            )));
        }
        Ok(())
    }

    pub fn put_attribute(&mut self, label: &Label, value: Value) -> MemoryResult<ThingRecord> {
        self.check_attribute_value(label, &value)?;
        if let Some(existing) = self.find_attribute(label, &value) {
            return self.thing_record(existing);
        }
        let def = self.ty(label)?;
        if def.is_abstract {
            return Err(MemoryError::InvalidData(format!(
                "cannot create instances of abstract type '{}'",
                label
            )));
        }
        if let (Some(pattern), Value::String(text)) = (&def.regex, &value) {
            if !compile(pattern)?.is_match(text) {
                return Err(MemoryError::InvalidData(format!(
                    "'{}' does not match the regex of '{}'",
                    text, label
                )));
            }
        }
        let thing = self.allocate(label.clone(), TypeKind::Attribute, Some(value));
        self.thing_record(&thing)
    }

    pub fn get_attribute(&self, label: &Label, value: &Value) -> MemoryResult<Option<ThingRecord>> {
        self.check_attribute_value(label, value)?;
        self.find_attribute(label, value)
            .map(|thing| self.thing_record(thing))
            .transpose()
    }

    fn find_attribute(&self, label: &Label, value: &Value) -> Option<&ThingDef> {
        self.things
            .values()
            .find(|t| &t.type_label == label && t.value.as_ref() == Some(value))
    }

    pub fn get_regex(&self, label: &Label) -> MemoryResult<String> {
        Ok(self
            .ty_of(label, TypeKind::Attribute)?
            .regex
            .clone()
            .unwrap_or_default())
    }

    pub fn set_regex(&mut self, label: &Label, pattern: &str) -> MemoryResult<()> {
        let def = self.ty_of(label, TypeKind::Attribute)?;
        def.ensure_not_root()?;
        if def.value_type != ValueType::String {
            return Err(MemoryError::InvalidSchema(format!(
                "'{}' does not hold string values",
                label
            )));
        }
        let regex = if pattern.is_empty() {
            None
        } else {
            let compiled = compile(pattern)?;
            let violating = self.things.values().any(|t| {
                &t.type_label == label
                    && matches!(&t.value, Some(Value::String(s)) if !compiled.is_match(s))
            });
            if violating {
                return Err(MemoryError::InvalidSchema(format!(
                    "existing '{}' attributes do not match '{}'",
                    label, pattern
                )));
            }
            Some(pattern.to_string())
        };
        self.ty_mut(label)?.regex = regex;
        Ok(())
    }

    // -- things -------------------------------------------------------------

    pub fn delete_thing(&mut self, iid: &[u8]) -> MemoryResult<()> {
        self.thing(iid)?;
        self.things.remove(iid);
        for thing in self.things.values_mut() {
            thing.has.retain(|a| a.as_slice() != iid);
            thing.players.retain(|(_, p)| p.as_slice() != iid);
        }
        Ok(())
    }

    pub fn get_has(
        &self,
        owner: &[u8],
        attribute_types: &[Label],
        annotations: &[Annotation],
    ) -> MemoryResult<Vec<ThingRecord>> {
        let owner = self.thing(owner)?;
        let mut records = Vec::new();
        for iid in &owner.has {
            let attribute = self.thing(iid)?;
            let type_matches = attribute_types.is_empty()
                || attribute_types
                    .iter()
                    .any(|t| self.is_subtype_of(&attribute.type_label, t));
            if !type_matches {
                continue;
            }
            if !annotations.is_empty() {
                let held = self
                    .ownership_for(&owner.type_label, &attribute.type_label)?
                    .map(|o| o.annotations)
                    .unwrap_or_default();
                if !satisfies(&held, annotations) {
                    continue;
                }
            }
            records.push(self.thing_record(attribute)?);
        }
        Ok(records)
    }

    pub fn set_has(&mut self, owner: &[u8], attribute: &[u8]) -> MemoryResult<()> {
        let owner_def = self.thing(owner)?;
        let attribute_def = self.thing(attribute)?;
        if self.thing_kind(attribute_def)? != TypeKind::Attribute {
            return Err(MemoryError::InvalidData(format!(
                "{} is not an attribute",
                hex(attribute)
            )));
        }
        if owner_def.has.iter().any(|a| a.as_slice() == attribute) {
            return Ok(());
        }
        let ownership = self
            .ownership_for(&owner_def.type_label, &attribute_def.type_label)?
            .ok_or_else(|| {
                MemoryError::InvalidData(format!(
                    "'{}' cannot own '{}'",
                    owner_def.type_label, attribute_def.type_label
                ))
            })?;

        if ownership.annotations.contains(&Annotation::Key) {
            let already_keyed = owner_def.has.iter().any(|a| {
                self.things
                    .get(a)
                    .map_or(false, |t| t.type_label == attribute_def.type_label)
            });
            if already_keyed {
                return Err(MemoryError::InvalidData(format!(
                    "{} already has a '{}' key",
                    hex(owner),
                    attribute_def.type_label
                )));
            }
        }
        if satisfies(&ownership.annotations, &[Annotation::Unique]) {
            let root = ownership_root(self, &owner_def.type_label, &ownership)?;
            let owners = self.subtypes_of(&root);
            let taken = self.things.values().any(|t| {
                t.iid.as_slice() != owner
                    && owners.contains(&t.type_label)
                    && t.has.iter().any(|a| a.as_slice() == attribute)
            });
            if taken {
                return Err(MemoryError::InvalidData(format!(
                    "'{}' {} is already owned uniquely",
                    attribute_def.type_label,
                    hex(attribute)
                )));
            }
        }

        self.thing_mut(owner)?.has.push(attribute.to_vec());
        Ok(())
    }

    pub fn unset_has(&mut self, owner: &[u8], attribute: &[u8]) -> MemoryResult<()> {
        self.thing(attribute)?;
        let owner_def = self.thing_mut(owner)?;
        let before = owner_def.has.len();
        owner_def.has.retain(|a| a.as_slice() != attribute);
        if owner_def.has.len() == before {
            return Err(MemoryError::InvalidData(format!(
                "{} does not own {}",
                hex(owner),
                hex(attribute)
            )));
        }
        Ok(())
    }

    pub fn get_relations(
        &self,
        player: &[u8],
        role_types: &[Label],
    ) -> MemoryResult<Vec<ThingRecord>> {
        self.thing(player)?;
        self.thing_records(self.things.values().filter(|relation| {
            relation.players.iter().any(|(role, p)| {
                p.as_slice() == player
                    && (role_types.is_empty()
                        || role_types.iter().any(|r| self.is_subtype_of(role, r)))
            })
        }))
    }

    pub fn get_playing(&self, player: &[u8]) -> MemoryResult<Vec<TypeRecord>> {
        self.thing(player)?;
        let mut roles = Vec::new();
        for relation in self.things.values() {
            for (role, p) in &relation.players {
                if p.as_slice() == player {
                    push_unique(&mut roles, role.clone());
                }
            }
        }
        self.type_records(&roles)
    }

    pub fn add_player(&mut self, relation: &[u8], role: &Label, player: &[u8]) -> MemoryResult<()> {
        let relation_def = self.thing(relation)?;
        if self.thing_kind(relation_def)? != TypeKind::Relation {
            return Err(MemoryError::InvalidData(format!(
                "{} is not a relation",
                hex(relation)
            )));
        }
        if !self.relates_labels(&relation_def.type_label)?.contains(role) {
            return Err(MemoryError::InvalidData(format!(
                "'{}' does not relate '{}'",
                relation_def.type_label, role
            )));
        }
        let player_def = self.thing(player)?;
        let plays = self
            .plays_entries(&player_def.type_label, false)?
            .iter()
            .any(|p| self.is_subtype_of(role, &p.role));
        if !plays {
            return Err(MemoryError::InvalidData(format!(
                "'{}' cannot play '{}'",
                player_def.type_label, role
            )));
        }

        let entry = (role.clone(), player.to_vec());
        let relation_def = self.thing_mut(relation)?;
        if !relation_def.players.contains(&entry) {
            relation_def.players.push(entry);
        }
        Ok(())
    }

    pub fn remove_player(
        &mut self,
        relation: &[u8],
        role: &Label,
        player: &[u8],
    ) -> MemoryResult<()> {
        let relation_def = self.thing_mut(relation)?;
        let before = relation_def.players.len();
        relation_def
            .players
            .retain(|(r, p)| !(r == role && p.as_slice() == player));
        if relation_def.players.len() == before {
            return Err(MemoryError::InvalidData(format!(
                "{} does not play '{}' in {}",
                hex(player),
                role,
                hex(relation)
            )));
        }
        Ok(())
    }

    pub fn get_players(
        &self,
        relation: &[u8],
        role_types: &[Label],
    ) -> MemoryResult<Vec<ThingRecord>> {
        let relation = self.thing(relation)?;
        let mut players: Vec<&[u8]> = Vec::new();
        for (role, player) in &relation.players {
            let wanted =
                role_types.is_empty() || role_types.iter().any(|r| self.is_subtype_of(role, r));
            if wanted && !players.contains(&player.as_slice()) {
                players.push(player.as_slice());
            }
        }
        players
            .into_iter()
            .map(|iid| self.thing(iid).and_then(|t| self.thing_record(t)))
            .collect()
    }

    pub fn attribute_owner_things(
        &self,
        attribute: &[u8],
        owner_type: Option<&Label>,
    ) -> MemoryResult<Vec<ThingRecord>> {
        self.thing(attribute)?;
        let owner_types = owner_type.map(|t| self.subtypes_of(t));
        self.thing_records(self.things.values().filter(|t| {
            t.has.iter().any(|a| a.as_slice() == attribute)
                && owner_types
                    .as_ref()
                    .map_or(true, |types| types.contains(&t.type_label))
        }))
    }

    // -- syntax -------------------------------------------------------------

    pub fn get_syntax(&self, label: &Label) -> MemoryResult<String> {
        let def = self.thing_type_def(label)?;
        let mut parts = Vec::new();
        if let Some(parent) = &def.supertype {
            parts.push(format!("{} sub {}", def.label, parent));
        } else {
            parts.push(def.label.to_string());
        }
        if def.is_abstract && !def.is_root {
            parts.push("abstract".to_string());
        }
        if def.kind == TypeKind::Attribute && def.value_type != ValueType::Object {
            parts.push(format!("value {}", def.value_type));
        }
        if let Some(regex) = &def.regex {
            parts.push(format!("regex \"{}\"", regex));
        }
        if def.kind == TypeKind::Relation {
            for role in self.declared_roles(label) {
                let role_def = self.ty(&role)?;
                match &role_def.supertype {
                    Some(parent) if parent != &TypeKind::Role.root_label() => {
                        parts.push(format!("relates {} as {}", role.name(), parent.name()))
                    }
                    _ => parts.push(format!("relates {}", role.name())),
                }
            }
        }
        for owns in &def.owns {
            let mut clause = format!("owns {}", owns.attribute);
            if let Some(overridden) = &owns.overridden {
                clause.push_str(&format!(" as {}", overridden));
            }
            for annotation in &owns.annotations {
                clause.push_str(&format!(" {}", annotation));
            }
            parts.push(clause);
        }
        for plays in &def.plays {
            let mut clause = format!("plays {}", plays.role);
            if let Some(overridden) = &plays.overridden {
                clause.push_str(&format!(" as {}", overridden));
            }
            parts.push(clause);
        }
        Ok(format!("{};", parts.join(", ")))
    }

    /// Definition of every user type, in label order
    pub fn schema(&self) -> String {
        let mut text = String::from("define\n");
        for def in self.types.values() {
            if def.is_root || def.kind == TypeKind::Role {
                continue;
            }
            if let Ok(syntax) = self.get_syntax(&def.label) {
                text.push('\n');
                text.push_str(&syntax);
            }
        }
        text
    }
}

/// Type whose instances share one uniqueness scope for `ownership`
fn ownership_root(graph: &Graph, owner: &Label, ownership: &Ownership) -> MemoryResult<Label> {
    let mut root = owner.clone();
    for ancestor in graph.supertypes_of(owner) {
        let declares = graph
            .ty(&ancestor)?
            .owns
            .iter()
            .any(|o| o.attribute == ownership.attribute);
        if declares {
            root = ancestor;
        }
    }
    Ok(root)
}

fn compile(pattern: &str) -> MemoryResult<Regex> {
    Regex::new(pattern).map_err(|e| MemoryError::InvalidRegex {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}
