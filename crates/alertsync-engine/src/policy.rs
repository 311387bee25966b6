//! Visibility, default-preference and alert rules.
//!
//! Pure functions over `Role`, `Identity` and `CategoryToggles`. Every
//! other component asks these instead of re-deriving role checks.

use chrono::{DateTime, Utc};

use alertsync_core::{Category, CategoryToggles, Identity, Message, Role, StoredToggles};

/// Whether `role` is allowed to see messages of `category`.
///
/// Unknown categories are treated like the most restricted known one a
/// non-admin can see (vip and admin only).
pub fn can_see_category(role: Role, category: &Category) -> bool {
    match category {
        Category::Debug => role == Role::Admin,
        Category::Info => true,
        Category::Priority | Category::Unknown(_) => matches!(role, Role::Vip | Role::Admin),
    }
}

/// Initial toggles for a role with nothing stored yet: info on, the rest
/// off.
pub fn default_preferences_for(role: Role) -> CategoryToggles {
    gate_toggles(role, StoredToggles::default())
}

/// Resolve stored toggles against a role.
///
/// A missing `info` reads as on; a missing `debug`/`prioritaire` reads
/// as off. Any category the role cannot see is forced off.
pub fn gate_toggles(role: Role, stored: StoredToggles) -> CategoryToggles {
    CategoryToggles {
        debug: can_see_category(role, &Category::Debug) && stored.debug.unwrap_or(false),
        info: can_see_category(role, &Category::Info) && stored.info.unwrap_or(true),
        priority: can_see_category(role, &Category::Priority) && stored.priority.unwrap_or(false),
    }
}

/// Admins never expire. Everyone else needs an expiry in the future.
pub fn is_subscription_expired(identity: &Identity, now: DateTime<Utc>) -> bool {
    if identity.role == Role::Admin {
        return false;
    }
    match identity.subscription_expiry {
        Some(expiry) => expiry < now,
        None => true,
    }
}

/// Whether an incoming message should raise a user-facing alert.
pub fn should_alert(
    message: &Message,
    preferences: &CategoryToggles,
    identity: &Identity,
    now: DateTime<Utc>,
) -> bool {
    can_see_category(identity.role, &message.category)
        && preferences.get(&message.category)
        && !is_subscription_expired(identity, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{at, msg};

    fn unknown() -> Category {
        Category::Unknown("Maintenance".into())
    }

    #[test]
    fn visibility_matrix() {
        let cases = [
            (Role::Normal, Category::Debug, false),
            (Role::Normal, Category::Info, true),
            (Role::Normal, Category::Priority, false),
            (Role::Vip, Category::Debug, false),
            (Role::Vip, Category::Info, true),
            (Role::Vip, Category::Priority, true),
            (Role::Admin, Category::Debug, true),
            (Role::Admin, Category::Info, true),
            (Role::Admin, Category::Priority, true),
        ];
        for (role, category, expected) in cases {
            assert_eq!(
                can_see_category(role, &category),
                expected,
                "{role} / {category}"
            );
        }
    }

    #[test]
    fn unknown_category_is_restricted() {
        assert!(!can_see_category(Role::Normal, &unknown()));
        assert!(can_see_category(Role::Vip, &unknown()));
        assert!(can_see_category(Role::Admin, &unknown()));
    }

    #[test]
    fn defaults_enable_only_info() {
        for role in [Role::Normal, Role::Vip, Role::Admin] {
            assert_eq!(
                default_preferences_for(role),
                CategoryToggles::new(false, true, false)
            );
        }
    }

    #[test]
    fn gating_forces_hidden_categories_off() {
        let stored = StoredToggles::from(CategoryToggles::new(true, true, true));
        assert_eq!(
            gate_toggles(Role::Normal, stored),
            CategoryToggles::new(false, true, false)
        );
        assert_eq!(
            gate_toggles(Role::Vip, stored),
            CategoryToggles::new(false, true, true)
        );
        assert_eq!(
            gate_toggles(Role::Admin, stored),
            CategoryToggles::new(true, true, true)
        );
    }

    #[test]
    fn gating_fills_missing_fields() {
        let stored = StoredToggles {
            debug: Some(true),
            info: None,
            priority: None,
        };
        assert_eq!(
            gate_toggles(Role::Admin, stored),
            CategoryToggles::new(true, true, false)
        );

        let stored = StoredToggles {
            info: Some(false),
            ..StoredToggles::default()
        };
        assert_eq!(
            gate_toggles(Role::Vip, stored),
            CategoryToggles::new(false, false, false)
        );
    }

    #[test]
    fn admin_never_expires() {
        let admin = Identity::new("a", Role::Admin, None);
        assert!(!is_subscription_expired(&admin, at(1_000)));
        let admin = Identity::new("a", Role::Admin, Some(at(10)));
        assert!(!is_subscription_expired(&admin, at(1_000)));
    }

    #[test]
    fn missing_or_past_expiry_is_expired() {
        let none = Identity::new("n", Role::Normal, None);
        assert!(is_subscription_expired(&none, at(1_000)));

        let past = Identity::new("v", Role::Vip, Some(at(999)));
        assert!(is_subscription_expired(&past, at(1_000)));

        let future = Identity::new("v", Role::Vip, Some(at(2_000)));
        assert!(!is_subscription_expired(&future, at(1_000)));
    }

    #[test]
    fn alert_requires_visibility_preference_and_subscription() {
        let now = at(1_000);
        let vip = Identity::new("v", Role::Vip, Some(at(5_000)));
        let all_on = CategoryToggles::new(true, true, true);

        assert!(should_alert(&msg(1, Category::Priority, 900), &all_on, &vip, now));
        assert!(!should_alert(&msg(2, Category::Debug, 900), &all_on, &vip, now));

        let priority_off = CategoryToggles::new(true, true, false);
        assert!(!should_alert(&msg(3, Category::Priority, 900), &priority_off, &vip, now));

        let expired = Identity::new("v", Role::Vip, Some(at(10)));
        assert!(!should_alert(&msg(4, Category::Info, 900), &all_on, &expired, now));
    }

    #[test]
    fn unknown_category_alerts_through_priority_switch() {
        let now = at(1_000);
        let vip = Identity::new("v", Role::Vip, Some(at(5_000)));
        let message = Message::new(9u64, "x", unknown(), at(900));
        assert!(should_alert(&message, &CategoryToggles::new(false, false, true), &vip, now));
        assert!(!should_alert(&message, &CategoryToggles::new(true, true, false), &vip, now));

        let normal = Identity::new("n", Role::Normal, Some(at(5_000)));
        assert!(!should_alert(&message, &CategoryToggles::new(true, true, true), &normal, now));
    }
}
