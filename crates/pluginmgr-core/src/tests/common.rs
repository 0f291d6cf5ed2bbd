#![cfg(test)]

// Shared fixtures: test interfaces, fake plugin entry points and an
// in-process LibraryLoader that hands out their addresses.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{c_char, c_void};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tempfile::{tempdir, TempDir};

use crate::constants::{
    DEFAULT_METADATA_SUFFIX, DEFAULT_PLUGIN_SUFFIX, FINALIZER_SYMBOL, INITIALIZER_SYMBOL, INSTANCER_SYMBOL,
    INTERFACE_SYMBOL, VERSION_SYMBOL,
};
use crate::error::{PluginManagerError, Result};
use crate::loader::{DynamicLibrary, LibraryLoader};
use crate::{AbstractPlugin, Manager, PLUGIN_VERSION, PluginBase, PluginInterface};

// --- Interfaces ---

pub trait Animal: AbstractPlugin {
    fn name(&self) -> String;
    fn leg_count(&self) -> u32;
    fn has_tail(&self) -> bool;
}

crate::plugin_interface!(dyn Animal, "cz.example.Animal/1.0");

pub trait Food: AbstractPlugin {
    fn is_tasty(&self) -> bool;
    fn weight(&self) -> u32;
}

crate::plugin_interface!(dyn Food, "cz.example.Food/1.0");

/// Interface reserved for the static plugin tests, so imported static
/// plugins don't show up in managers of other tests.
pub trait Bird: Animal {}

crate::plugin_interface!(dyn Bird, "cz.example.Bird/1.0");

/// Interface reserved for the duplicate static plugin test.
pub trait Fish: Animal {}

crate::plugin_interface!(dyn Fish, "cz.example.Fish/1.0");

/// Interface reserved for static plugins with dependencies.
pub trait Reptile: Animal {}

crate::plugin_interface!(dyn Reptile, "cz.example.Reptile/1.0");

/// Interface without metadata sidecars.
pub trait Insect: Animal {}

crate::plugin_interface!(dyn Insect, "cz.example.Insect/1.0", metadata_suffix = "");

// --- Plugin types ---

pub struct FakeAnimal {
    base: PluginBase,
    name: &'static str,
    legs: u32,
    tail: bool,
    deletable: bool,
}

impl FakeAnimal {
    pub fn new(base: PluginBase, name: &'static str, legs: u32, tail: bool) -> Self {
        Self {
            base,
            name,
            legs,
            tail,
            deletable: false,
        }
    }

    pub fn deletable(mut self) -> Self {
        self.deletable = true;
        self
    }
}

impl AbstractPlugin for FakeAnimal {
    fn base(&self) -> &PluginBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PluginBase {
        &mut self.base
    }

    fn can_be_deleted(&self) -> bool {
        self.deletable
    }
}

impl Animal for FakeAnimal {
    fn name(&self) -> String {
        self.name.to_string()
    }

    fn leg_count(&self) -> u32 {
        self.legs
    }

    fn has_tail(&self) -> bool {
        self.tail
    }
}

impl Bird for FakeAnimal {}
impl Fish for FakeAnimal {}
impl Reptile for FakeAnimal {}
impl Insect for FakeAnimal {}

pub struct FakeFood {
    base: PluginBase,
    tasty: bool,
    weight: u32,
}

impl AbstractPlugin for FakeFood {
    fn base(&self) -> &PluginBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PluginBase {
        &mut self.base
    }
}

impl Food for FakeFood {
    fn is_tasty(&self) -> bool {
        self.tasty
    }

    fn weight(&self) -> u32 {
        self.weight
    }
}

// --- Event log for initializers and finalizers ---

thread_local! {
    static EVENTS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

pub fn record(event: &str) {
    EVENTS.with(|events| events.borrow_mut().push(event.to_string()));
}

/// Events recorded on this thread since the last call.
pub fn take_events() -> Vec<String> {
    EVENTS.with(|events| std::mem::take(&mut *events.borrow_mut()))
}

// --- Plugin entry points handed out by the fake loader ---

pub type TestInstancer = extern "C-unwind" fn(*mut c_void) -> *mut c_void;
pub type TestInterface = extern "C-unwind" fn() -> *const c_char;

pub static CURRENT_VERSION: u32 = PLUGIN_VERSION;
pub static OLD_VERSION: u32 = 0;

pub extern "C-unwind" fn animal_interface() -> *const c_char {
    c"cz.example.Animal/1.0".as_ptr()
}

pub extern "C-unwind" fn old_animal_interface() -> *const c_char {
    c"cz.example.Animal/0.9".as_ptr()
}

pub extern "C-unwind" fn food_interface() -> *const c_char {
    c"cz.example.Food/1.0".as_ptr()
}

pub extern "C-unwind" fn insect_interface() -> *const c_char {
    c"cz.example.Insect/1.0".as_ptr()
}

extern "C-unwind" fn noop_hook() {}

pub extern "C-unwind" fn tracked_initializer() {
    record("initialized");
}

pub extern "C-unwind" fn tracked_finalizer() {
    record("finalized");
}

pub extern "C-unwind" fn panicking_initializer() {
    panic!("cannot initialize");
}

fn base_from_raw(base: *mut c_void) -> PluginBase {
    *unsafe { Box::from_raw(base.cast::<PluginBase>()) }
}

fn instance_into_raw<I: ?Sized>(instance: Box<I>) -> *mut c_void {
    Box::into_raw(Box::new(instance)).cast::<c_void>()
}

pub extern "C-unwind" fn dog_instancer(base: *mut c_void) -> *mut c_void {
    let animal: Box<dyn Animal> = Box::new(FakeAnimal::new(base_from_raw(base), "Doug", 4, true));
    instance_into_raw(animal)
}

pub extern "C-unwind" fn pit_bull_instancer(base: *mut c_void) -> *mut c_void {
    let animal: Box<dyn Animal> = Box::new(FakeAnimal::new(base_from_raw(base), "Rodriguez", 4, true));
    instance_into_raw(animal)
}

pub extern "C-unwind" fn cat_instancer(base: *mut c_void) -> *mut c_void {
    let animal: Box<dyn Animal> = Box::new(FakeAnimal::new(base_from_raw(base), "Tom", 4, true));
    instance_into_raw(animal)
}

pub extern "C-unwind" fn snail_instancer(base: *mut c_void) -> *mut c_void {
    let animal: Box<dyn Animal> = Box::new(FakeAnimal::new(base_from_raw(base), "Gary", 0, false));
    instance_into_raw(animal)
}

pub extern "C-unwind" fn ghost_instancer(base: *mut c_void) -> *mut c_void {
    let animal: Box<dyn Animal> = Box::new(FakeAnimal::new(base_from_raw(base), "Casper", 0, false).deletable());
    instance_into_raw(animal)
}

pub extern "C-unwind" fn beetle_instancer(base: *mut c_void) -> *mut c_void {
    let insect: Box<dyn Insect> = Box::new(FakeAnimal::new(base_from_raw(base), "Ringo", 6, false));
    instance_into_raw(insect)
}

pub extern "C-unwind" fn hot_dog_instancer(base: *mut c_void) -> *mut c_void {
    let food: Box<dyn Food> = Box::new(FakeFood {
        base: base_from_raw(base),
        tasty: true,
        weight: 200,
    });
    instance_into_raw(food)
}

pub extern "C-unwind" fn null_instancer(base: *mut c_void) -> *mut c_void {
    drop(base_from_raw(base));
    std::ptr::null_mut()
}

// --- Fake loader ---

/// Exported symbols of a fake plugin binary.
#[derive(Clone, Default)]
pub struct Symbols(HashMap<String, usize>);

impl Symbols {
    /// A complete, valid set of entry points.
    pub fn plugin(interface: TestInterface, instancer: TestInstancer) -> Self {
        Self::default()
            .with(VERSION_SYMBOL, &CURRENT_VERSION as *const u32 as usize)
            .with(INTERFACE_SYMBOL, interface as usize)
            .with(INITIALIZER_SYMBOL, noop_hook as usize)
            .with(FINALIZER_SYMBOL, noop_hook as usize)
            .with(INSTANCER_SYMBOL, instancer as usize)
    }

    pub fn animal(instancer: TestInstancer) -> Self {
        Self::plugin(animal_interface, instancer)
    }

    pub fn food(instancer: TestInstancer) -> Self {
        Self::plugin(food_interface, instancer)
    }

    pub fn with(mut self, symbol: &str, address: usize) -> Self {
        self.0.insert(symbol.to_string(), address);
        self
    }

    pub fn without(mut self, symbol: &str) -> Self {
        self.0.remove(symbol);
        self
    }

    /// The same symbols exported as `<prefix>_<symbol>`.
    pub fn prefixed(self, prefix: &str) -> Self {
        Self(
            self.0
                .into_iter()
                .map(|(symbol, address)| (format!("{}_{}", prefix, symbol), address))
                .collect(),
        )
    }

    pub fn and(mut self, other: Symbols) -> Self {
        self.0.extend(other.0);
        self
    }
}

/// Loader serving registered fake binaries by file name and tracking which
/// of them are currently open.
#[derive(Default)]
pub struct FakeLoader {
    libraries: Mutex<HashMap<String, Symbols>>,
    open: Arc<Mutex<Vec<String>>>,
    opened: AtomicUsize,
}

impl FakeLoader {
    pub fn register(&self, file_name: &str, symbols: Symbols) {
        self.libraries.lock().insert(file_name.to_string(), symbols);
    }

    /// File names of libraries opened and not closed yet.
    pub fn open_libraries(&self) -> Vec<String> {
        let mut open = self.open.lock().clone();
        open.sort();
        open
    }

    /// How many times a library was opened.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl LibraryLoader for FakeLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn DynamicLibrary>> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        let Some(symbols) = self.libraries.lock().get(&file_name).cloned() else {
            return Err(PluginManagerError::LibraryOpen {
                path: path.to_path_buf(),
                message: "not a fake plugin binary".to_string(),
            });
        };
        self.open.lock().push(file_name.clone());
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeLibrary {
            file_name,
            symbols,
            open: Arc::clone(&self.open),
        }))
    }
}

struct FakeLibrary {
    file_name: String,
    symbols: Symbols,
    open: Arc<Mutex<Vec<String>>>,
}

impl DynamicLibrary for FakeLibrary {
    fn symbol(&self, name: &str) -> Option<*const c_void> {
        self.symbols.0.get(name).map(|address| *address as *const c_void)
    }

    fn close(self: Box<Self>) -> Result<()> {
        let mut open = self.open.lock();
        if let Some(position) = open.iter().position(|name| *name == self.file_name) {
            open.remove(position);
        }
        Ok(())
    }
}

// --- Plugin directories ---

pub const DOG_CONF: &str = r#"
provides = ["JustSomeMammal", "AGoodBoy"]

[configuration]
sound = "woof"
legs = 4
"#;

pub const PIT_BULL_CONF: &str = r#"
depends = "Dog"
provides = ["Dog", "JustSomeMammal"]
"#;

pub const SNAIL_CONF: &str = r#"
depends = ["SomethingThatDoesNotExist"]
"#;

pub const HOT_DOG_WITH_SNAIL_CONF: &str = r#"
depends = ["Dog", "Snail"]
"#;

pub const HOT_DOG_CONF: &str = r#"
depends = ["Dog"]
"#;

/// A temporary plugin directory served by a [`FakeLoader`].
pub struct PluginDir {
    dir: TempDir,
    pub loader: Arc<FakeLoader>,
}

impl PluginDir {
    pub fn new() -> Self {
        Self {
            dir: tempdir().expect("Failed to create plugin directory"),
            loader: Arc::new(FakeLoader::default()),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn binary_path(&self, name: &str) -> PathBuf {
        self.path().join(format!("{}{}", name, DEFAULT_PLUGIN_SUFFIX))
    }

    /// Add a plugin binary and its metadata sidecar.
    pub fn add(&self, name: &str, symbols: Symbols, metadata: &str) -> &Self {
        self.add_binary(name, symbols);
        fs::write(self.path().join(format!("{}{}", name, DEFAULT_METADATA_SUFFIX)), metadata)
            .expect("Failed to write metadata file");
        self
    }

    /// Add a plugin binary without a sidecar.
    pub fn add_binary(&self, name: &str, symbols: Symbols) -> &Self {
        let path = self.binary_path(name);
        fs::write(&path, b"").expect("Failed to write plugin binary");
        self.loader.register(&format!("{}{}", name, DEFAULT_PLUGIN_SUFFIX), symbols);
        self
    }

    pub fn remove(&self, name: &str) {
        let _ = fs::remove_file(self.binary_path(name));
        let _ = fs::remove_file(self.path().join(format!("{}{}", name, DEFAULT_METADATA_SUFFIX)));
    }

    pub fn manager<I: ?Sized + PluginInterface>(&self) -> Manager<I> {
        Manager::<I>::builder()
            .plugin_directory(self.path())
            .loader(self.loader.clone())
            .build()
    }
}

/// Directory with the animals most tests need: Dog, PitBull, Snail and
/// HotDogWithSnail.
pub fn animal_dir() -> PluginDir {
    let dir = PluginDir::new();
    dir.add("Dog", Symbols::animal(dog_instancer), DOG_CONF)
        .add("PitBull", Symbols::animal(pit_bull_instancer), PIT_BULL_CONF)
        .add("Snail", Symbols::animal(snail_instancer), SNAIL_CONF)
        .add("HotDogWithSnail", Symbols::animal(snail_instancer), HOT_DOG_WITH_SNAIL_CONF);
    dir
}
