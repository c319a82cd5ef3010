mod handler;
mod model;

pub use handler::{activity_ratings, create_rating, delete_rating, my_ratings, update_rating};
pub use model::{
    ActivityRating, CreateRatingRequest, RatingStatistics, ScoreBucket, UpdateRatingRequest, summarize_scores,
    validate_score,
};
