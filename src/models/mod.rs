// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod feed;
pub mod friend;
pub mod garage;
pub mod realtime;
pub mod route;
pub mod track;

pub use feed::{FeedEntry, FeedMode, FeedPost, NewFeedPost, PostAuthor, PostKind, RouteSummary};
pub use friend::{
    Friend, FriendRequest, Friendship, FriendshipKey, FriendshipStatus, Profile, RequestSender,
    UserSummary,
};
pub use garage::{
    Expiration, ExpirationInput, ExpirationKind, ExpirationStatus, ExpirationView, Maintenance,
    MaintenanceInput, Motorcycle, MotorcycleDetails,
};
pub use realtime::{
    ChangeEvent, ChangeKind, ChannelMessage, ChannelSpec, ChannelStatus, ColumnFilter,
    ConnectionState, ConnectionStatus, RowChange,
};
pub use route::{
    LatLng, NewRoute, PointMetadata, Route, RouteBounds, RouteGeometry, RouteMetadata, Visibility,
};
pub use track::{Fix, Position, TrackPoint};
