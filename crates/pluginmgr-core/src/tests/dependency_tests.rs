#![cfg(test)]

use crate::constants::{INSTANCER_SYMBOL, VERSION_SYMBOL};
use crate::tests::common::{animal_dir, cat_instancer, dog_instancer, Animal, Symbols, OLD_VERSION};
use crate::LoadState;

#[test]
fn test_transitive_dependencies() {
    let dir = animal_dir();
    let manager = dir.manager::<dyn Animal>();

    assert_eq!(manager.load("PitBull"), LoadState::Loaded);
    assert_eq!(manager.load_state("Dog"), LoadState::Loaded);
    assert_eq!(manager.metadata("Dog").unwrap().used_by(), ["PitBull"]);

    assert_eq!(manager.unload("Dog"), LoadState::Required);
    assert_eq!(manager.load_state("Dog"), LoadState::Loaded);

    assert_eq!(manager.unload("PitBull"), LoadState::NotLoaded);
    assert!(manager.metadata("Dog").unwrap().used_by().is_empty());
    assert_eq!(manager.unload("Dog"), LoadState::NotLoaded);
    assert!(dir.loader.open_libraries().is_empty());
}

#[test]
fn test_unresolved_dependency_is_atomic() {
    let dir = animal_dir();
    let manager = dir.manager::<dyn Animal>();
    let aliases = manager.alias_list();

    assert_eq!(manager.load("HotDogWithSnail"), LoadState::UnresolvedDependency);
    assert!(manager.metadata("Dog").unwrap().used_by().is_empty());
    assert_eq!(manager.load_state("Dog"), LoadState::NotLoaded);
    assert_eq!(manager.load_state("Snail"), LoadState::NotLoaded);
    assert_eq!(manager.load_state("HotDogWithSnail"), LoadState::NotLoaded);
    assert_eq!(manager.alias_list(), aliases);
    assert!(dir.loader.open_libraries().is_empty());
}

#[test]
fn test_failed_load_keeps_previously_loaded_dependency() {
    let dir = animal_dir();
    let manager = dir.manager::<dyn Animal>();
    assert_eq!(manager.load("Dog"), LoadState::Loaded);

    assert_eq!(manager.load("HotDogWithSnail"), LoadState::UnresolvedDependency);
    assert_eq!(manager.load_state("Dog"), LoadState::Loaded);
    assert!(manager.metadata("Dog").unwrap().used_by().is_empty());
}

#[test]
fn test_failing_plugin_rolls_back_its_dependencies() {
    let dir = animal_dir();
    dir.add(
        "Mutt",
        Symbols::animal(dog_instancer).with(VERSION_SYMBOL, &OLD_VERSION as *const u32 as usize),
        "depends = [\"PitBull\"]\n",
    );
    let manager = dir.manager::<dyn Animal>();

    assert_eq!(manager.load("Mutt"), LoadState::WrongPluginVersion);
    assert_eq!(manager.load_state("PitBull"), LoadState::NotLoaded);
    assert_eq!(manager.load_state("Dog"), LoadState::NotLoaded);
    assert!(manager.metadata("Dog").unwrap().used_by().is_empty());
    assert!(dir.loader.open_libraries().is_empty());
}

#[test]
fn test_failing_dependency_binary() {
    let dir = animal_dir();
    dir.add("Broken", Symbols::animal(dog_instancer).without(INSTANCER_SYMBOL), "")
        .add("Cat", Symbols::animal(cat_instancer), "depends = [\"Dog\", \"Broken\"]\n");
    let manager = dir.manager::<dyn Animal>();

    assert_eq!(manager.load("Cat"), LoadState::UnresolvedDependency);
    assert_eq!(manager.load_state("Dog"), LoadState::NotLoaded);
    assert_eq!(manager.load_state("Broken"), LoadState::NotLoaded);
    assert!(dir.loader.open_libraries().is_empty());
}

#[test]
fn test_dependency_on_wrong_metadata_file() {
    let dir = animal_dir();
    dir.add_binary("Orphan", Symbols::animal(dog_instancer))
        .add("Cat", Symbols::animal(cat_instancer), "depends = [\"Orphan\"]\n");
    let manager = dir.manager::<dyn Animal>();

    assert_eq!(manager.load("Cat"), LoadState::UnresolvedDependency);
    assert_eq!(manager.load_state("Orphan"), LoadState::WrongMetadataFile);
}

#[test]
fn test_dependency_through_alias_needs_loaded_provider() {
    let dir = animal_dir();
    dir.add("Cat", Symbols::animal(cat_instancer), "depends = [\"AGoodBoy\"]\n");
    let manager = dir.manager::<dyn Animal>();

    // AGoodBoy is only an alias of Dog, which isn't loaded.
    assert_eq!(manager.load("Cat"), LoadState::UnresolvedDependency);
    assert_eq!(manager.load_state("Dog"), LoadState::NotLoaded);

    assert_eq!(manager.load("Dog"), LoadState::Loaded);
    assert_eq!(manager.load("Cat"), LoadState::Loaded);
    assert_eq!(manager.metadata("Dog").unwrap().used_by(), ["Cat"]);
    assert_eq!(manager.unload("AGoodBoy"), LoadState::Required);
}

#[test]
fn test_dependency_cycle() {
    let dir = animal_dir();
    dir.add("Ping", Symbols::animal(dog_instancer), "depends = [\"Pong\"]\n")
        .add("Pong", Symbols::animal(cat_instancer), "depends = [\"Ping\"]\n");
    let manager = dir.manager::<dyn Animal>();

    assert_eq!(manager.load("Ping"), LoadState::UnresolvedDependency);
    assert_eq!(manager.load_state("Ping"), LoadState::NotLoaded);
    assert_eq!(manager.load_state("Pong"), LoadState::NotLoaded);
    assert!(dir.loader.open_libraries().is_empty());
}

#[test]
fn test_idempotent_load_does_not_duplicate_used_by() {
    let dir = animal_dir();
    dir.add("Cat", Symbols::animal(cat_instancer), "depends = [\"Dog\"]\n");
    let manager = dir.manager::<dyn Animal>();

    assert_eq!(manager.load("PitBull"), LoadState::Loaded);
    assert_eq!(manager.load("Cat"), LoadState::Loaded);
    assert_eq!(manager.load("Cat"), LoadState::Loaded);
    assert_eq!(manager.load("PitBull"), LoadState::Loaded);
    assert_eq!(manager.metadata("Dog").unwrap().used_by(), ["PitBull", "Cat"]);

    assert_eq!(manager.unload("Cat"), LoadState::NotLoaded);
    assert_eq!(manager.metadata("Dog").unwrap().used_by(), ["PitBull"]);
}

#[test]
fn test_loaded_plugins_have_loaded_dependencies() {
    let dir = animal_dir();
    dir.add("Cat", Symbols::animal(cat_instancer), "depends = [\"PitBull\", \"JustSomeMammal\"]\n");
    let manager = dir.manager::<dyn Animal>();
    assert_eq!(manager.load("Cat"), LoadState::Loaded);

    for plugin in manager.plugin_list() {
        if manager.load_state(&plugin) != LoadState::Loaded {
            continue;
        }
        let depends = manager.metadata(&plugin).unwrap().depends().to_vec();
        for dependency in depends {
            assert!(
                manager.load_state(&dependency).is_active(),
                "{} is loaded but its dependency {} is not",
                plugin,
                dependency
            );
            let used_by = manager.metadata(&dependency).unwrap().used_by().to_vec();
            assert!(used_by.contains(&plugin), "{} missing from used-by of {}", plugin, dependency);
        }
    }
}
