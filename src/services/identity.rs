//! Identity resolution: every inbound event is attributed to a stored [`User`].

use time::OffsetDateTime;
use tracing::info;

use crate::{
    dao::models::UserEntity,
    error::ServiceError,
    gateway::Sender,
    state::{
        SharedState,
        session::{User, UserStatus},
    },
};

/// Load the user behind `sender`, registering them on first contact, and attach their rating.
///
/// A storage failure is returned: an event whose sender cannot be resolved is not routed.
pub async fn resolve_user(state: &SharedState, sender: &Sender) -> Result<User, ServiceError> {
    let stores = state.stores();
    let stored = stores
        .users
        .fetch(sender.id)
        .await
        .map_err(ServiceError::storage("fetch user"))?;

    let user = match stored {
        Some(entity) => User::from(entity),
        None => {
            let user = first_contact(sender, &state.config().admin);
            stores
                .users
                .store(UserEntity::from(user.clone()))
                .await
                .map_err(ServiceError::storage("store user"))?;
            info!(user_id = %user.id, admin = user.admin, "registered new user");
            user
        }
    };

    with_rating(state, user).await
}

/// Copy the aggregate rating of `user` into its counters. Users without records keep zeros.
pub async fn with_rating(state: &SharedState, mut user: User) -> Result<User, ServiceError> {
    if let Some(rating) = state
        .stores()
        .stats
        .fetch_rating(user.id)
        .await
        .map_err(ServiceError::storage("fetch rating"))?
    {
        user.stars = rating.stars;
        user.bloops = rating.bloops;
    }
    Ok(user)
}

fn first_contact(sender: &Sender, admin: &str) -> User {
    let username = sender.username.trim().trim_start_matches('@').to_owned();
    User {
        id: sender.id,
        first_name: sender.first_name.clone(),
        last_name: sender.last_name.clone(),
        admin: !admin.is_empty() && username == admin,
        username,
        language_code: sender.language_code.clone(),
        status: UserStatus::Active,
        created_at: OffsetDateTime::now_utc(),
        stars: 0,
        bloops: 0,
    }
}
