mod handler;
mod model;

pub use handler::*;
pub use model::{ArticleDetail, ArticleListQuery, ArticleStatus, CreateArticleRequest, ScienceArticle, UpdateArticleRequest};
