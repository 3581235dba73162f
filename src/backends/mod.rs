/*!
Release distribution backends
*/

pub mod github;
