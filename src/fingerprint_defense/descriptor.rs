//! Descriptor-preserving property override.
//!
//! `override_property` replaces a readable attribute with an accessor that
//! returns the resolver's value while keeping the original
//! enumerable/configurable bits. If the instance refuses the new accessor,
//! it is installed on the instance's prototype (the shared template)
//! instead, kept configurable so later calls can still adjust it. If that
//! fails too, nothing happens.
//!
//! The contract is expressed over the `DescriptorTarget` trait so the
//! two-tier resolution can be tested without a browser. The JS binding is
//! the `impl DescriptorTarget for js_sys::Object` below.

use std::rc::Rc;

use js_sys::{Object, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use crate::error::{FingerprintError, Result};

/// Visibility and mutability bits of a property descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorMeta {
    pub enumerable: bool,
    pub configurable: bool,
}

impl Default for DescriptorMeta {
    fn default() -> Self {
        Self {
            enumerable: true,
            configurable: true,
        }
    }
}

/// A fixed value, or a computation evaluated on every read.
pub enum Resolver<V> {
    Fixed(V),
    Computed(Rc<dyn Fn() -> V>),
}

impl<V: Clone> Resolver<V> {
    pub fn fixed(value: V) -> Self {
        Resolver::Fixed(value)
    }

    pub fn computed(f: impl Fn() -> V + 'static) -> Self {
        Resolver::Computed(Rc::new(f))
    }

    pub fn resolve(&self) -> V {
        match self {
            Resolver::Fixed(value) => value.clone(),
            Resolver::Computed(f) => f(),
        }
    }
}

impl<V: Clone> Clone for Resolver<V> {
    fn clone(&self) -> Self {
        match self {
            Resolver::Fixed(value) => Resolver::Fixed(value.clone()),
            Resolver::Computed(f) => Resolver::Computed(Rc::clone(f)),
        }
    }
}

/// Where an override ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Landing {
    Instance,
    Template,
    Skipped,
}

/// Diagnostic record of one override. Never handed to page code.
#[derive(Debug, Clone)]
pub struct OverrideRecord {
    pub property: String,
    pub meta: DescriptorMeta,
    pub landing: Landing,
}

impl OverrideRecord {
    pub fn fallback_applied(&self) -> bool {
        self.landing == Landing::Template
    }

    pub fn landed(&self) -> bool {
        self.landing != Landing::Skipped
    }
}

/// An object that can report descriptors and accept accessor properties.
pub trait DescriptorTarget: Sized {
    type Value: Clone + 'static;

    /// Metadata of the object's own property, if it has one.
    fn own_descriptor(&self, property: &str) -> Option<DescriptorMeta>;

    /// The object's inheritance source.
    fn template(&self) -> Option<Self>;

    /// Install an accessor returning `resolver.resolve()` on every read.
    fn install_getter(
        &self,
        property: &str,
        resolver: &Resolver<Self::Value>,
        meta: DescriptorMeta,
    ) -> Result<()>;
}

/// Override `property` on `target`. Never fails; the record says where the
/// accessor landed.
pub fn override_property<T: DescriptorTarget>(
    target: &T,
    property: &str,
    resolver: Resolver<T::Value>,
) -> OverrideRecord {
    let template = target.template();
    let meta = target
        .own_descriptor(property)
        .or_else(|| template.as_ref().and_then(|t| t.own_descriptor(property)))
        .unwrap_or_default();

    let mut record = OverrideRecord {
        property: property.to_string(),
        meta,
        landing: Landing::Skipped,
    };

    match target.install_getter(property, &resolver, meta) {
        Ok(()) => {
            record.landing = Landing::Instance;
            return record;
        }
        Err(err) => log::trace!("{} on instance: {}", property, err),
    }

    if let Some(template) = template {
        let relaxed = DescriptorMeta {
            configurable: true,
            ..meta
        };
        match template.install_getter(property, &resolver, relaxed) {
            Ok(()) => record.landing = Landing::Template,
            Err(err) => log::trace!("{} on template: {}", property, err),
        }
    }

    if !record.landed() {
        log::debug!("override of `{}` did not land", property);
    }
    record
}

// ===== JS binding =====

impl DescriptorTarget for Object {
    type Value = JsValue;

    fn own_descriptor(&self, property: &str) -> Option<DescriptorMeta> {
        let descriptor = Object::get_own_property_descriptor(self, &JsValue::from_str(property));
        if descriptor.is_undefined() || descriptor.is_null() {
            return None;
        }
        let flag = |name: &str| {
            Reflect::get(&descriptor, &JsValue::from_str(name))
                .ok()
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
        };
        Some(DescriptorMeta {
            enumerable: flag("enumerable"),
            configurable: flag("configurable"),
        })
    }

    fn template(&self) -> Option<Self> {
        let proto = Object::get_prototype_of(self);
        if proto.is_null() || proto.is_undefined() {
            None
        } else {
            Some(proto)
        }
    }

    fn install_getter(
        &self,
        property: &str,
        resolver: &Resolver<JsValue>,
        meta: DescriptorMeta,
    ) -> Result<()> {
        let resolver = resolver.clone();
        let getter = Closure::wrap(
            Box::new(move || -> JsValue { resolver.resolve() }) as Box<dyn FnMut() -> JsValue>
        );

        let descriptor = Object::new();
        Reflect::set(&descriptor, &JsValue::from_str("get"), getter.as_ref())?;
        Reflect::set(
            &descriptor,
            &JsValue::from_str("enumerable"),
            &JsValue::from_bool(meta.enumerable),
        )?;
        Reflect::set(
            &descriptor,
            &JsValue::from_str("configurable"),
            &JsValue::from_bool(meta.configurable),
        )?;

        // Reflect.defineProperty reports refusal as `false` instead of throwing
        if !Reflect::define_property(self, &JsValue::from_str(property), &descriptor)? {
            return Err(FingerprintError::refused(property));
        }
        getter.forget();
        Ok(())
    }
}

/// Override `property` on a JS value with a fixed value.
pub fn define_value(target: &JsValue, property: &str, value: JsValue) -> OverrideRecord {
    define_with(target, property, Resolver::fixed(value))
}

/// Override `property` on a JS value with a getter evaluated per read.
pub fn define_getter(
    target: &JsValue,
    property: &str,
    getter: impl Fn() -> JsValue + 'static,
) -> OverrideRecord {
    define_with(target, property, Resolver::computed(getter))
}

fn define_with(target: &JsValue, property: &str, resolver: Resolver<JsValue>) -> OverrideRecord {
    // `instanceof Object` fails across realms, so check the type tag only
    if target.is_object() || target.is_function() {
        override_property(target.unchecked_ref::<Object>(), property, resolver)
    } else {
        OverrideRecord {
            property: property.to_string(),
            meta: DescriptorMeta::default(),
            landing: Landing::Skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;

    struct Slot {
        meta: DescriptorMeta,
        resolver: Resolver<i64>,
    }

    #[derive(Default)]
    struct MockInner {
        props: RefCell<HashMap<String, Slot>>,
        frozen: Cell<bool>,
        installs: Cell<usize>,
        proto: Option<MockObject>,
    }

    /// In-memory stand-in for a JS object with an optional prototype.
    #[derive(Clone, Default)]
    struct MockObject(Rc<MockInner>);

    impl MockObject {
        fn with_proto(proto: &MockObject) -> Self {
            MockObject(Rc::new(MockInner {
                proto: Some(proto.clone()),
                ..Default::default()
            }))
        }

        fn seed(&self, property: &str, value: i64, meta: DescriptorMeta) {
            self.0.props.borrow_mut().insert(
                property.to_string(),
                Slot {
                    meta,
                    resolver: Resolver::fixed(value),
                },
            );
        }

        fn freeze(&self) {
            self.0.frozen.set(true);
        }

        /// Property lookup along the prototype chain.
        fn read(&self, property: &str) -> Option<i64> {
            if let Some(slot) = self.0.props.borrow().get(property) {
                return Some(slot.resolver.resolve());
            }
            self.0.proto.as_ref().and_then(|p| p.read(property))
        }

        fn own_meta(&self, property: &str) -> Option<DescriptorMeta> {
            self.0.props.borrow().get(property).map(|s| s.meta)
        }
    }

    impl DescriptorTarget for MockObject {
        type Value = i64;

        fn own_descriptor(&self, property: &str) -> Option<DescriptorMeta> {
            self.own_meta(property)
        }

        fn template(&self) -> Option<Self> {
            self.0.proto.clone()
        }

        fn install_getter(
            &self,
            property: &str,
            resolver: &Resolver<i64>,
            meta: DescriptorMeta,
        ) -> Result<()> {
            if self.0.frozen.get() {
                return Err(FingerprintError::refused(property));
            }
            if let Some(existing) = self.own_meta(property) {
                if !existing.configurable {
                    return Err(FingerprintError::refused(property));
                }
            }
            self.0.installs.set(self.0.installs.get() + 1);
            self.0.props.borrow_mut().insert(
                property.to_string(),
                Slot {
                    meta,
                    resolver: resolver.clone(),
                },
            );
            Ok(())
        }
    }

    const HIDDEN_LOCKED: DescriptorMeta = DescriptorMeta {
        enumerable: false,
        configurable: false,
    };

    #[test]
    fn test_lands_on_instance_with_template_meta() {
        let proto = MockObject::default();
        proto.seed(
            "hardwareConcurrency",
            12,
            DescriptorMeta {
                enumerable: false,
                configurable: true,
            },
        );
        let nav = MockObject::with_proto(&proto);

        let record = override_property(&nav, "hardwareConcurrency", Resolver::fixed(8));

        assert_eq!(record.landing, Landing::Instance);
        assert!(!record.fallback_applied());
        assert_eq!(nav.read("hardwareConcurrency"), Some(8));
        assert_eq!(nav.own_meta("hardwareConcurrency").unwrap().enumerable, false);
        assert_eq!(nav.own_meta("hardwareConcurrency").unwrap().configurable, true);
    }

    #[test]
    fn test_defaults_to_visible_and_rewritable() {
        let nav = MockObject::default();
        let record = override_property(&nav, "deviceMemory", Resolver::fixed(8));
        assert_eq!(record.meta, DescriptorMeta::default());
        assert_eq!(nav.own_meta("deviceMemory"), Some(DescriptorMeta::default()));
    }

    #[test]
    fn test_falls_back_to_template_when_instance_refuses() {
        let proto = MockObject::default();
        let nav = MockObject::with_proto(&proto);
        nav.freeze();
        proto.seed(
            "platform",
            1,
            DescriptorMeta {
                enumerable: false,
                configurable: true,
            },
        );

        let record = override_property(&nav, "platform", Resolver::fixed(42));

        assert_eq!(record.landing, Landing::Template);
        assert!(record.fallback_applied());
        assert_eq!(nav.read("platform"), Some(42));
        let meta = proto.own_meta("platform").unwrap();
        assert!(meta.configurable, "template overrides stay adjustable");
        assert!(!meta.enumerable, "visibility is preserved");
    }

    #[test]
    fn test_total_failure_is_silent() {
        let proto = MockObject::default();
        proto.seed("vendor", 7, HIDDEN_LOCKED);
        proto.freeze();
        let nav = MockObject::with_proto(&proto);
        nav.freeze();

        let record = override_property(&nav, "vendor", Resolver::fixed(0));

        assert_eq!(record.landing, Landing::Skipped);
        assert_eq!(nav.read("vendor"), Some(7));
    }

    #[test]
    fn test_no_template_and_refused() {
        let orphan = MockObject::default();
        orphan.seed("userAgent", 3, HIDDEN_LOCKED);
        let record = override_property(&orphan, "userAgent", Resolver::fixed(9));
        assert!(!record.landed());
        assert_eq!(orphan.read("userAgent"), Some(3));
    }

    #[test]
    fn test_repeated_override_last_write_wins() {
        let nav = MockObject::default();
        override_property(&nav, "maxTouchPoints", Resolver::fixed(5));
        override_property(&nav, "maxTouchPoints", Resolver::fixed(0));
        assert_eq!(nav.read("maxTouchPoints"), Some(0));
        assert_eq!(nav.0.props.borrow().len(), 1);
        assert_eq!(nav.0.installs.get(), 2);
    }

    #[test]
    fn test_computed_resolver_runs_per_read() {
        let counter = Rc::new(Cell::new(0));
        let c = Rc::clone(&counter);
        let nav = MockObject::default();
        override_property(
            &nav,
            "innerWidth",
            Resolver::computed(move || {
                c.set(c.get() + 1);
                c.get()
            }),
        );
        assert_eq!(nav.read("innerWidth"), Some(1));
        assert_eq!(nav.read("innerWidth"), Some(2));
        assert_eq!(counter.get(), 2);
    }
}
