//! Realm handle and Proxy-based interception helpers.
//!
//! Replacement methods and getters are `Proxy` objects around the real
//! functions with an `apply` trap backed by a WASM closure. The proxy keeps
//! the target's `name`, `length` and `toString()` output, so introspection
//! sees the native function.
//!
//! Everything here takes an explicit `Realm` because a child frame has its
//! own constructors and prototypes: `instanceof` and `dyn_ref` both fail
//! across realms.

use std::rc::Rc;

use js_sys::{Array, ArrayBuffer, Function, Object, Proxy, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use crate::error::{FingerprintError, Result};

type Trap = Closure<dyn FnMut(JsValue, JsValue, JsValue) -> std::result::Result<JsValue, JsValue>>;

/// The global object of one document (main page or child frame).
#[derive(Clone)]
pub struct Realm {
    global: Object,
}

impl Realm {
    /// The realm this module instance was loaded into.
    pub fn current() -> Self {
        Self {
            global: js_sys::global(),
        }
    }

    /// A realm reached through a frame's `contentWindow`.
    pub fn from_window(window: &JsValue) -> Option<Self> {
        if window.is_object() {
            Some(Self {
                global: window.clone().unchecked_into(),
            })
        } else {
            None
        }
    }

    pub fn global(&self) -> &Object {
        &self.global
    }

    /// A global binding. `None` when absent, null, or unreadable.
    pub fn get(&self, name: &str) -> Option<JsValue> {
        match Reflect::get(&self.global, &JsValue::from_str(name)) {
            Ok(value) if !value.is_undefined() && !value.is_null() => Some(value),
            _ => None,
        }
    }

    pub fn require(&self, name: &str) -> Result<JsValue> {
        self.get(name).ok_or_else(|| FingerprintError::missing(name))
    }

    /// `ctor.prototype` for a global constructor.
    pub fn prototype(&self, ctor: &str) -> Result<Object> {
        let ctor_value = self.require(ctor)?;
        let proto = Reflect::get(&ctor_value, &JsValue::from_str("prototype"))?;
        if proto.is_object() {
            Ok(proto.unchecked_into())
        } else {
            Err(FingerprintError::missing(format!("{}.prototype", ctor)))
        }
    }

    /// `new ctor(...args)` with this realm's constructor.
    pub fn construct(&self, ctor: &str, args: &[JsValue]) -> Result<JsValue> {
        let ctor_value = self.require(ctor)?;
        if !ctor_value.is_function() {
            return Err(FingerprintError::missing(ctor));
        }
        Ok(Reflect::construct(
            ctor_value.unchecked_ref::<Function>(),
            &to_array(args),
        )?)
    }

    /// Realm-safe `value instanceof ctor`.
    pub fn is_instance(&self, value: &JsValue, ctor: &str) -> bool {
        value.is_object()
            && self
                .prototype(ctor)
                .map(|proto| proto.is_prototype_of(value))
                .unwrap_or(false)
    }

    pub fn document(&self) -> Result<JsValue> {
        self.require("document")
    }

    pub fn create_element(&self, tag: &str) -> Result<JsValue> {
        call_method(&self.document()?, "createElement", &[JsValue::from_str(tag)])
    }

    /// Copy `items` into an array owned by this realm.
    pub fn array(&self, items: &Array) -> JsValue {
        self.require("Array")
            .and_then(|ctor| call_method(&ctor, "from", &[items.clone().into()]))
            .unwrap_or_else(|_| items.clone().into())
    }

    /// `Promise.resolve(value)` in this realm.
    pub fn resolved(&self, value: &JsValue) -> JsValue {
        self.require("Promise")
            .and_then(|ctor| call_method(&ctor, "resolve", &[value.clone()]))
            .unwrap_or_else(|_| js_sys::Promise::resolve(value).into())
    }

    /// `Promise.reject(reason)` in this realm.
    pub fn rejected(&self, reason: &JsValue) -> JsValue {
        self.require("Promise")
            .and_then(|ctor| call_method(&ctor, "reject", &[reason.clone()]))
            .unwrap_or_else(|_| js_sys::Promise::reject(reason).into())
    }

    pub fn dom_exception(&self, message: &str, name: &str) -> JsValue {
        self.construct(
            "DOMException",
            &[JsValue::from_str(message), JsValue::from_str(name)],
        )
        .unwrap_or_else(|_| js_sys::Error::new(message).into())
    }

    pub fn type_error(&self, message: &str) -> JsValue {
        self.construct("TypeError", &[JsValue::from_str(message)])
            .unwrap_or_else(|_| js_sys::TypeError::new(message).into())
    }

    /// Read-only array of strings owned by this realm.
    pub fn frozen_string_array(&self, items: &[String]) -> JsValue {
        let arr: Array = items.iter().map(|s| JsValue::from_str(s)).collect();
        let adopted = self.array(&arr);
        if adopted.is_object() {
            Object::freeze(adopted.unchecked_ref::<Object>());
        }
        adopted
    }
}

/// Serialize plain data into a JS value. Maps become plain objects.
pub fn to_js<T: serde::Serialize + ?Sized>(value: &T) -> Result<JsValue> {
    let serializer = serde_wasm_bindgen::Serializer::json_compatible();
    value
        .serialize(&serializer)
        .map_err(|err| FingerprintError::Host(err.to_string()))
}

pub fn to_array(args: &[JsValue]) -> Array {
    args.iter().collect()
}

/// Call `obj[name](...args)`.
pub fn call_method(obj: &JsValue, name: &str, args: &[JsValue]) -> Result<JsValue> {
    let func = Reflect::get(obj, &JsValue::from_str(name))?;
    if !func.is_function() {
        return Err(FingerprintError::missing(name));
    }
    Ok(Reflect::apply(
        func.unchecked_ref::<Function>(),
        obj,
        &to_array(args),
    )?)
}

pub fn get_f64(obj: &JsValue, name: &str) -> Option<f64> {
    Reflect::get(obj, &JsValue::from_str(name))
        .ok()
        .and_then(|v| v.as_f64())
}

pub fn get_string(obj: &JsValue, name: &str) -> Option<String> {
    Reflect::get(obj, &JsValue::from_str(name))
        .ok()
        .and_then(|v| v.as_string())
}

/// WebIDL `DOMString` conversion of one argument. Symbols are refused the
/// way the host refuses them.
pub fn to_dom_string(value: &JsValue) -> Result<String> {
    if let Some(text) = value.as_string() {
        return Ok(text);
    }
    if value.is_symbol() {
        return Err(FingerprintError::sanitizer("DOMString", "symbol argument"));
    }
    call_global("String", value)?
        .as_string()
        .ok_or_else(|| FingerprintError::sanitizer("DOMString", "conversion gave no string"))
}

/// ECMAScript `ToNumber` of one argument. Symbols and BigInts are refused.
pub fn to_number(value: &JsValue) -> Result<f64> {
    if let Some(number) = value.as_f64() {
        return Ok(number);
    }
    if value.is_symbol() || value.is_bigint() {
        return Err(FingerprintError::sanitizer("ToNumber", "symbol or bigint argument"));
    }
    call_global("Number", value)?
        .as_f64()
        .ok_or_else(|| FingerprintError::sanitizer("ToNumber", "conversion gave no number"))
}

fn call_global(name: &str, value: &JsValue) -> Result<JsValue> {
    let func = Reflect::get(&js_sys::global(), &JsValue::from_str(name))?;
    if !func.is_function() {
        return Err(FingerprintError::missing(name));
    }
    Ok(Reflect::apply(
        func.unchecked_ref::<Function>(),
        &JsValue::UNDEFINED,
        &Array::of1(value),
    )?)
}

/// Overwrite every element of a typed array with zero.
pub fn zero_typed_array(value: &JsValue) -> Result<()> {
    if !ArrayBuffer::is_view(value) {
        return Err(FingerprintError::sanitizer("zero", "not a typed array"));
    }
    call_method(value, "fill", &[JsValue::from_f64(0.0)])?;
    Ok(())
}

/// The object in `obj`'s prototype chain that owns `name`.
pub fn find_owner(obj: &Object, name: &str) -> Option<Object> {
    let key = JsValue::from_str(name);
    let mut current = obj.clone();
    loop {
        let descriptor = Object::get_own_property_descriptor(&current, &key);
        if !descriptor.is_undefined() {
            return Some(current);
        }
        let proto = Object::get_prototype_of(&current);
        if proto.is_null() || proto.is_undefined() {
            return None;
        }
        current = proto;
    }
}

fn descriptor_flag(descriptor: &JsValue, name: &str, default: bool) -> bool {
    Reflect::get(descriptor, &JsValue::from_str(name))
        .ok()
        .and_then(|v| v.as_bool())
        .unwrap_or(default)
}

fn define(owner: &Object, name: &str, descriptor: &Object) -> Result<()> {
    if Reflect::define_property(owner, &JsValue::from_str(name), descriptor)? {
        Ok(())
    } else {
        Err(FingerprintError::refused(name))
    }
}

fn set_field(obj: &Object, name: &str, value: &JsValue) -> Result<()> {
    Reflect::set(obj, &JsValue::from_str(name), value)?;
    Ok(())
}

/// Install `value` as a data property, keeping the current descriptor bits.
pub fn install_value(owner: &Object, name: &str, value: &JsValue) -> Result<()> {
    let current = Object::get_own_property_descriptor(owner, &JsValue::from_str(name));
    let descriptor = Object::new();
    set_field(&descriptor, "value", value)?;
    for flag in ["writable", "enumerable", "configurable"] {
        let bit = if current.is_undefined() {
            flag != "enumerable"
        } else {
            descriptor_flag(&current, flag, true)
        };
        set_field(&descriptor, flag, &JsValue::from_bool(bit))?;
    }
    define(owner, name, &descriptor)
}

fn apply_proxy(target: &JsValue, trap: Trap) -> Result<JsValue> {
    let handler = Object::new();
    set_field(&handler, "apply", trap.as_ref())?;
    trap.forget();
    Ok(Proxy::new(target, &handler).into())
}

/// Replace `owner[name]` with a proxy whose calls go through `sanitizer`.
///
/// The sanitizer receives the real function, the receiver and the
/// arguments. If it fails, the call is forwarded to the real function
/// unchanged.
pub fn wrap_method<F>(owner: &Object, name: &str, sanitizer: F) -> Result<()>
where
    F: Fn(&Function, &JsValue, &Array) -> Result<JsValue> + 'static,
{
    let original = Reflect::get(owner, &JsValue::from_str(name))?;
    if !original.is_function() {
        return Err(FingerprintError::missing(name));
    }
    let label = name.to_string();
    let trap: Trap = Closure::wrap(Box::new(
        move |target: JsValue, this: JsValue, args: JsValue| -> std::result::Result<JsValue, JsValue> {
        let target: &Function = target.unchecked_ref();
        let args: &Array = args.unchecked_ref();
        match sanitizer(target, &this, args) {
            Ok(value) => Ok(value),
            Err(err) => {
                log::debug!("{}: falling back to host result: {}", label, err);
                Reflect::apply(target, &this, args)
            }
        }
    }));
    let proxy = apply_proxy(&original, trap)?;
    install_value(owner, name, &proxy)
}

/// Replace `owner[name]` with a proxy that calls the real function and then
/// passes its result through `post`. Exceptions from the real function
/// reach the caller unchanged. If `post` fails, the real result is returned.
pub fn wrap_result<F>(owner: &Object, name: &str, post: F) -> Result<()>
where
    F: Fn(JsValue, &JsValue, &Array) -> Result<JsValue> + 'static,
{
    let original = Reflect::get(owner, &JsValue::from_str(name))?;
    if !original.is_function() {
        return Err(FingerprintError::missing(name));
    }
    let label = name.to_string();
    let trap: Trap = Closure::wrap(Box::new(
        move |target: JsValue, this: JsValue, args: JsValue| -> std::result::Result<JsValue, JsValue> {
        let target: &Function = target.unchecked_ref();
        let args: &Array = args.unchecked_ref();
        let real = Reflect::apply(target, &this, args)?;
        match post(real.clone(), &this, args) {
            Ok(value) => Ok(value),
            Err(err) => {
                log::debug!("{}: keeping host result: {}", label, err);
                Ok(real)
            }
        }
    }));
    let proxy = apply_proxy(&original, trap)?;
    install_value(owner, name, &proxy)
}

/// Replace the accessor `owner[name]` with a proxied getter. The setter and
/// descriptor bits are kept. If `sanitizer` fails, the real getter runs.
pub fn wrap_getter<F>(owner: &Object, name: &str, sanitizer: F) -> Result<()>
where
    F: Fn(&Function, &JsValue) -> Result<JsValue> + 'static,
{
    let current = Object::get_own_property_descriptor(owner, &JsValue::from_str(name));
    if current.is_undefined() {
        return Err(FingerprintError::missing(name));
    }
    let getter = Reflect::get(&current, &JsValue::from_str("get"))?;
    if !getter.is_function() {
        return Err(FingerprintError::missing(format!("get {}", name)));
    }

    let label = name.to_string();
    let trap: Trap = Closure::wrap(Box::new(
        move |target: JsValue, this: JsValue, args: JsValue| -> std::result::Result<JsValue, JsValue> {
        let target: &Function = target.unchecked_ref();
        match sanitizer(target, &this) {
            Ok(value) => Ok(value),
            Err(err) => {
                log::debug!("get {}: falling back to host value: {}", label, err);
                Reflect::apply(target, &this, args.unchecked_ref())
            }
        }
    }));
    let proxy = apply_proxy(&getter, trap)?;

    let descriptor = Object::new();
    set_field(&descriptor, "get", &proxy)?;
    set_field(&descriptor, "set", &Reflect::get(&current, &JsValue::from_str("set"))?)?;
    set_field(
        &descriptor,
        "enumerable",
        &JsValue::from_bool(descriptor_flag(&current, "enumerable", true)),
    )?;
    set_field(
        &descriptor,
        "configurable",
        &JsValue::from_bool(descriptor_flag(&current, "configurable", true)),
    )?;
    define(owner, name, &descriptor)
}

/// Replace the constructor `owner[name]` with a proxy that passes its
/// arguments through `rewrite`, for both `new ctor(..)` and plain calls.
/// Returns the installed proxy.
pub fn wrap_constructor<F>(owner: &Object, name: &str, rewrite: F) -> Result<JsValue>
where
    F: Fn(&Array) -> Result<Array> + 'static,
{
    wrap_constructor_with_call(owner, name, rewrite, |target, this, args| {
        Ok(Reflect::apply(target, this, args)?)
    })
}

/// `wrap_constructor` where a plain call `ctor(..)` goes through `call`
/// with the rewritten arguments. If `call` fails, the real function runs.
pub fn wrap_constructor_with_call<F, C>(owner: &Object, name: &str, rewrite: F, call: C) -> Result<JsValue>
where
    F: Fn(&Array) -> Result<Array> + 'static,
    C: Fn(&Function, &JsValue, &Array) -> Result<JsValue> + 'static,
{
    let original = Reflect::get(owner, &JsValue::from_str(name))?;
    if !original.is_function() {
        return Err(FingerprintError::missing(name));
    }
    let rewritten = {
        let label = name.to_string();
        move |args: &Array| -> Array {
            rewrite(args).unwrap_or_else(|err| {
                log::debug!("{}: keeping caller arguments: {}", label, err);
                args.clone()
            })
        }
    };
    let rewritten = Rc::new(rewritten);

    let for_construct = Rc::clone(&rewritten);
    let construct: Trap = Closure::wrap(Box::new(
        move |target: JsValue, args: JsValue, new_target: JsValue| -> std::result::Result<JsValue, JsValue> {
            let args = for_construct(args.unchecked_ref());
            Reflect::construct_with_new_target(target.unchecked_ref(), &args, new_target.unchecked_ref())
        },
    ));
    let for_apply = rewritten;
    let label = name.to_string();
    let apply: Trap = Closure::wrap(Box::new(
        move |target: JsValue, this: JsValue, args: JsValue| -> std::result::Result<JsValue, JsValue> {
            let target: &Function = target.unchecked_ref();
            let args = for_apply(args.unchecked_ref());
            match call(target, &this, &args) {
                Ok(value) => Ok(value),
                Err(err) => {
                    log::debug!("{}(): falling back to host call: {}", label, err);
                    Reflect::apply(target, &this, &args)
                }
            }
        },
    ));

    let handler = Object::new();
    set_field(&handler, "construct", construct.as_ref())?;
    set_field(&handler, "apply", apply.as_ref())?;
    construct.forget();
    apply.forget();
    let proxy: JsValue = Proxy::new(&original, &handler).into();
    install_value(owner, name, &proxy)?;
    Ok(proxy)
}

/// A plain function that ignores its arguments and returns `value`.
pub fn constant_fn(value: JsValue) -> JsValue {
    let closure = Closure::wrap(Box::new(move || value.clone()) as Box<dyn FnMut() -> JsValue>);
    let func = closure.as_ref().clone();
    closure.forget();
    func
}

/// A zero-length collection shaped like the realm's `ctor` instances
/// (`PluginArray`, `MimeTypeArray`). Lookups return null and iteration
/// yields nothing.
pub fn empty_collection(realm: &Realm, ctor: &str) -> Result<JsValue> {
    let collection = match realm.prototype(ctor) {
        Ok(proto) => Object::create(&proto),
        Err(_) => Object::new(),
    };
    let hidden = |name: &str, value: JsValue| -> Result<()> {
        let descriptor = Object::new();
        set_field(&descriptor, "value", &value)?;
        define(&collection, name, &descriptor)
    };
    hidden("length", JsValue::from_f64(0.0))?;
    hidden("item", constant_fn(JsValue::NULL))?;
    hidden("namedItem", constant_fn(JsValue::NULL))?;
    hidden("refresh", constant_fn(JsValue::UNDEFINED))?;

    let iterator_fn = Closure::wrap(Box::new(move || -> JsValue {
        Array::new().values().into()
    }) as Box<dyn FnMut() -> JsValue>);
    let descriptor = Object::new();
    set_field(&descriptor, "value", iterator_fn.as_ref())?;
    iterator_fn.forget();
    let iterator_key: JsValue = js_sys::Symbol::iterator().into();
    if !Reflect::define_property(&collection, &iterator_key, &descriptor)? {
        return Err(FingerprintError::refused("Symbol.iterator"));
    }

    Object::freeze(&collection);
    Ok(collection.into())
}
