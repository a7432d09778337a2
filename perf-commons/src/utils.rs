use std::collections::BTreeMap;

/// Process environment as a map, for rendering query and object templates.
pub fn env_to_map() -> BTreeMap<String, String> {
    std::env::vars_os()
        .map(|(k, v)| {
            (
                k.to_string_lossy().into_owned(),
                v.to_string_lossy().into_owned(),
            )
        })
        .collect()
}
