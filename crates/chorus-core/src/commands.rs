//! # Domain Command Table
//!
//! Maps an entity's domain to the command set a speaker may issue against
//! it. Device firmware renders voice menus from this table, so entries only
//! grow, never change meaning.

/// Supported commands for a given entity domain. Unknown domains get an
/// empty set (entity is listed but not commandable).
pub fn supported_commands_for_domain(domain: &str) -> &'static [&'static str] {
    match domain {
        "light" => &["turn_on", "turn_off", "toggle", "set_brightness"],
        "switch" => &["turn_on", "turn_off", "toggle"],
        "climate" => &["set_temperature", "set_mode"],
        "media_player" => &[
            "play",
            "pause",
            "stop",
            "volume_set",
            "volume_up",
            "volume_down",
        ],
        "cover" => &["open_cover", "close_cover", "stop_cover"],
        "fan" => &["turn_on", "turn_off", "set_speed"],
        "scene" => &["turn_on"],
        "script" => &["turn_on"],
        _ => &[],
    }
}

/// Extracts the domain from an entity id (`light.kitchen` -> `light`).
/// An id with no separator is its own domain.
pub fn domain_of(entity_id: &str) -> &str {
    entity_id.split('.').next().unwrap_or(entity_id)
}
