mod repository_tests;
mod router_tests;
mod support;
