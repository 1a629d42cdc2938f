//! Process-wide configuration. Kept in its own test binary because it swaps
//! global state.

use faultline_error::{Config, ConfigError, Error, configure, current_config};

#[test]
fn configure_validates_and_applies() {
    let rejected = configure(Config::default().with_stack_depth(0));
    assert!(matches!(
        rejected,
        Err(ConfigError::OutOfRange {
            field: "stack_depth",
            ..
        })
    ));
    assert_eq!(current_config().stack_depth, 32);

    configure(
        Config::default()
            .with_stack_depth(3)
            .with_context_size(2),
    )
    .unwrap();
    assert_eq!(current_config().stack_depth, 3);

    let traced = Error::trace("shallow");
    assert!(traced.stack().len() <= 3);

    let err = Error::new("ctx").with("a", 1).with("b", 2);
    assert!(!err.context_promoted());
    let err = err.with("c", 3);
    assert!(err.context_promoted());
    assert_eq!(err.context().len(), 3);

    configure(Config::default().with_pooling(false)).unwrap();
    let before = faultline_error::pool_stats().releases;
    Error::new("unpooled").free();
    assert_eq!(faultline_error::pool_stats().releases, before);

    configure(Config::default()).unwrap();
}
