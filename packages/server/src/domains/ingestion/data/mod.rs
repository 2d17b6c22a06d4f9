pub mod postgres;

pub use postgres::{
    PgVectorSimilarityIndex, PostgresEntityStore, PostgresSessionStore, PostgresTransactionStore,
};
